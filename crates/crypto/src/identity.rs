//! The validator's identity key material.
//!
//! Both private keys live inside one holder that guarantees zeroing on drop,
//! which also covers identity rotation: swapping in a new holder drops (and
//! therefore wipes) the old one.

use crate::error::CryptoError;
use crate::hash::{derive_address, derive_peer_id};
use crate::keystore::{self, KeystoreFile, SensitiveBytes};
use crate::sign::{bls::BlsSecretKey, eddsa};
use basalt_types::{
    Address, BlsPublicKey, BlsSignature, Ed25519PublicKey, Ed25519Signature, PeerId,
};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use zeroize::Zeroizing;

/// A validator's Ed25519 identity key and BLS consensus key.
///
/// The Ed25519 key signs transport handshakes and transactions; the BLS key
/// signs consensus payloads so votes can be aggregated.
pub struct ValidatorKeys {
    ed25519: SigningKey,
    bls: BlsSecretKey,
}

impl ValidatorKeys {
    pub fn generate() -> Result<Self, CryptoError> {
        let (ed25519, _) = eddsa::generate_keypair();
        let bls = BlsSecretKey::generate()?;
        Ok(Self { ed25519, bls })
    }

    /// Deterministic construction from two 32-byte seeds.
    pub fn from_seeds(ed25519_seed: &[u8; 32], bls_seed: &[u8; 32]) -> Result<Self, CryptoError> {
        let (ed25519, _) = eddsa::keypair_from_seed(ed25519_seed);
        let bls = BlsSecretKey::from_seed(bls_seed)?;
        Ok(Self { ed25519, bls })
    }

    pub fn ed25519_public(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.ed25519.verifying_key().to_bytes())
    }

    pub fn bls_public(&self) -> BlsPublicKey {
        self.bls.public_key()
    }

    pub fn address(&self) -> Address {
        derive_address(&self.ed25519_public())
    }

    pub fn peer_id(&self) -> PeerId {
        derive_peer_id(&self.ed25519_public())
    }

    /// Signs with the identity key (handshakes, transactions).
    pub fn sign_identity(&self, message: &[u8]) -> Ed25519Signature {
        eddsa::sign(&self.ed25519, message)
    }

    /// Signs a consensus payload with the BLS key.
    pub fn sign_consensus(&self, payload: &[u8]) -> BlsSignature {
        self.bls.sign(payload)
    }

    /// Borrow of the raw signing key for transaction signing helpers.
    pub fn ed25519_signing_key(&self) -> &SigningKey {
        &self.ed25519
    }

    /// Serializes both seeds into an encrypted keystore record.
    ///
    /// Layout of the plaintext: `ed25519 seed (32) || bls scalar (32)`.
    pub fn to_keystore(&self, passphrase: &str) -> Result<KeystoreFile, CryptoError> {
        let mut blob = Zeroizing::new([0u8; 64]);
        blob[..32].copy_from_slice(&self.ed25519.to_bytes());
        blob[32..].copy_from_slice(self.bls.to_bytes().as_ref());
        keystore::encrypt(blob.as_ref(), passphrase)
    }

    /// Restores the holder from an encrypted keystore record.
    pub fn from_keystore(file: &KeystoreFile, passphrase: &str) -> Result<Self, CryptoError> {
        let plain: SensitiveBytes = keystore::decrypt(file, passphrase)?;
        if plain.0.len() != 64 {
            return Err(CryptoError::LengthMismatch {
                expected: 64,
                got: plain.0.len(),
            });
        }
        let mut ed_seed = Zeroizing::new([0u8; 32]);
        ed_seed.copy_from_slice(&plain.0[..32]);
        let ed25519 = SigningKey::from_bytes(&ed_seed);
        let bls = BlsSecretKey::from_bytes(&plain.0[32..])?;
        Ok(Self { ed25519, bls })
    }
}

// SigningKey and BlsSecretKey both zeroize their scalars on drop, so the
// holder needs no manual Drop impl.

/// Fresh 32 bytes of handshake nonce material.
pub fn random_nonce() -> [u8; 32] {
    let mut nonce = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}
