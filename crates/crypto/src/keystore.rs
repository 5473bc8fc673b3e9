//! Encrypted keystore for validator identity material.
//!
//! On-disk format is a JSON record:
//!
//! ```json
//! {
//!   "version": 1,
//!   "kdf": { "iterations": 3, "memory_kib": 65536, "parallelism": 4 },
//!   "salt": "<32-byte hex>",
//!   "nonce": "<12-byte hex>",
//!   "ciphertext": "<hex>"
//! }
//! ```
//!
//! The key-encryption key is Argon2id over the passphrase. Decrypt validates
//! the version and enforces minimum KDF parameters, so a downgraded file
//! cannot silently weaken the work factor. Files are created owner-only.

use crate::aead::{aead_open, aead_seal, AEAD_NONCE_LEN};
use crate::error::CryptoError;
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const KEYSTORE_VERSION: u32 = 1;
const SALT_LEN: usize = 32;

// Creation defaults.
const DEFAULT_ITERATIONS: u32 = 3;
const DEFAULT_MEMORY_KIB: u32 = 64 * 1024;
const DEFAULT_PARALLELISM: u32 = 4;

// Enforced minimums on decrypt.
const MIN_ITERATIONS: u32 = 2;
const MIN_MEMORY_KIB: u32 = 16 * 1024;
const MIN_PARALLELISM: u32 = 1;

/// Sensitive plaintext that zeroizes on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SensitiveBytes(pub Vec<u8>);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub iterations: u32,
    pub memory_kib: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreFile {
    pub version: u32,
    pub kdf: KdfParams,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

fn derive_kek(
    passphrase: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| CryptoError::BadKeystoreParameters(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut kek = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(passphrase.as_bytes(), salt, kek.as_mut())
        .map_err(|e| CryptoError::KeyGen(format!("argon2 derivation failed: {e}")))?;
    Ok(kek)
}

fn enforce_minimums(params: &KdfParams) -> Result<(), CryptoError> {
    if params.iterations < MIN_ITERATIONS {
        return Err(CryptoError::BadKeystoreParameters(format!(
            "iterations {} below minimum {}",
            params.iterations, MIN_ITERATIONS
        )));
    }
    if params.memory_kib < MIN_MEMORY_KIB {
        return Err(CryptoError::BadKeystoreParameters(format!(
            "memory {} KiB below minimum {}",
            params.memory_kib, MIN_MEMORY_KIB
        )));
    }
    if params.parallelism < MIN_PARALLELISM {
        return Err(CryptoError::BadKeystoreParameters(
            "parallelism must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Encrypts secret bytes under a passphrase with the creation defaults.
pub fn encrypt(secret: &[u8], passphrase: &str) -> Result<KeystoreFile, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; AEAD_NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let kdf = KdfParams {
        iterations: DEFAULT_ITERATIONS,
        memory_kib: DEFAULT_MEMORY_KIB,
        parallelism: DEFAULT_PARALLELISM,
    };
    let kek = derive_kek(passphrase, &salt, &kdf)?;
    let ciphertext = aead_seal(&kek, &nonce, b"basalt-keystore-v1", secret)?;

    Ok(KeystoreFile {
        version: KEYSTORE_VERSION,
        kdf,
        salt: hex::encode(salt),
        nonce: hex::encode(nonce),
        ciphertext: hex::encode(ciphertext),
    })
}

/// Decrypts a keystore record, enforcing the version and minimum KDF work.
pub fn decrypt(file: &KeystoreFile, passphrase: &str) -> Result<SensitiveBytes, CryptoError> {
    if file.version != KEYSTORE_VERSION {
        return Err(CryptoError::KeystoreVersion(file.version));
    }
    enforce_minimums(&file.kdf)?;

    let salt = hex::decode(&file.salt)
        .map_err(|_| CryptoError::KeystoreFormat("malformed salt hex".into()))?;
    if salt.len() != SALT_LEN {
        return Err(CryptoError::LengthMismatch {
            expected: SALT_LEN,
            got: salt.len(),
        });
    }
    let nonce_raw = hex::decode(&file.nonce)
        .map_err(|_| CryptoError::KeystoreFormat("malformed nonce hex".into()))?;
    let nonce: [u8; AEAD_NONCE_LEN] =
        nonce_raw
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::LengthMismatch {
                expected: AEAD_NONCE_LEN,
                got: nonce_raw.len(),
            })?;
    let ciphertext = hex::decode(&file.ciphertext)
        .map_err(|_| CryptoError::KeystoreFormat("malformed ciphertext hex".into()))?;

    let kek = derive_kek(passphrase, &salt, &file.kdf)?;
    let plaintext = aead_open(&kek, &nonce, b"basalt-keystore-v1", &ciphertext)?;
    Ok(SensitiveBytes(plaintext))
}

/// Writes a keystore record to disk with owner-only permissions.
pub fn save_to_file(file: &KeystoreFile, path: &Path) -> Result<(), CryptoError> {
    let json = serde_json::to_vec_pretty(file)
        .map_err(|e| CryptoError::KeystoreFormat(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| CryptoError::KeystoreIo(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| CryptoError::KeystoreIo(e.to_string()))?;
    }
    Ok(())
}

pub fn load_from_file(path: &Path) -> Result<KeystoreFile, CryptoError> {
    let raw = std::fs::read(path).map_err(|e| CryptoError::KeystoreIo(e.to_string()))?;
    serde_json::from_slice(&raw).map_err(|e| CryptoError::KeystoreFormat(e.to_string()))
}
