//! Channel cryptography: X25519 key exchange, HKDF key derivation and
//! AES-256-GCM framing keys.
//!
//! The two directions of a connection use disjoint keys derived with
//! direction labels, so their nonce spaces can both start at zero without
//! any risk of nonce reuse across directions. Identity binding comes from
//! feeding both peers' long-term public keys — sorted, so both sides derive
//! the same material — into the HKDF `info` parameter.

use crate::error::CryptoError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use basalt_types::Ed25519PublicKey;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

pub use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, SharedSecret};

/// Protocol tag bound into the key schedule and the ephemeral-key binding
/// signature.
pub const PROTOCOL_TAG: &[u8] = b"basalt/handshake/v1";

pub const AEAD_KEY_LEN: usize = 32;
pub const AEAD_NONCE_LEN: usize = 12;
pub const AEAD_TAG_LEN: usize = 16;

/// Generates an ephemeral X25519 keypair for one handshake. The secret is
/// consumed by the exchange and zeroized by the library on drop.
pub fn ephemeral_keypair() -> (EphemeralSecret, X25519PublicKey) {
    let secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let public = X25519PublicKey::from(&secret);
    (secret, public)
}

/// The message an endpoint signs to bind its ephemeral key to its identity:
/// `PROTOCOL_TAG || ephemeral public || local nonce || remote nonce`.
pub fn ephemeral_binding(
    ephemeral: &X25519PublicKey,
    local_nonce: &[u8; 32],
    remote_nonce: &[u8; 32],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(PROTOCOL_TAG.len() + 32 * 3);
    out.extend_from_slice(PROTOCOL_TAG);
    out.extend_from_slice(ephemeral.as_bytes());
    out.extend_from_slice(local_nonce);
    out.extend_from_slice(remote_nonce);
    out
}

/// Per-direction AEAD keys for one connection.
pub struct DirectionalKeys {
    pub send: Zeroizing<[u8; AEAD_KEY_LEN]>,
    pub recv: Zeroizing<[u8; AEAD_KEY_LEN]>,
}

/// Derives the two directional keys from the X25519 shared secret.
///
/// `initiator` selects which derived key is the send key; both endpoints
/// compute the same pair and pick opposite halves. All intermediate buffers
/// are zeroized before return.
pub fn derive_directional_keys(
    shared: &SharedSecret,
    local_identity: &Ed25519PublicKey,
    remote_identity: &Ed25519PublicKey,
    initiator: bool,
) -> Result<DirectionalKeys, CryptoError> {
    let (lo, hi) = if local_identity.0 <= remote_identity.0 {
        (local_identity, remote_identity)
    } else {
        (remote_identity, local_identity)
    };

    let hk = Hkdf::<Sha256>::new(Some(PROTOCOL_TAG), shared.as_bytes());

    let mut info = Vec::with_capacity(64 + 16);
    info.extend_from_slice(&lo.0);
    info.extend_from_slice(&hi.0);

    let derive = |label: &[u8]| -> Result<Zeroizing<[u8; AEAD_KEY_LEN]>, CryptoError> {
        let mut scoped = info.clone();
        scoped.extend_from_slice(label);
        let mut okm = Zeroizing::new([0u8; AEAD_KEY_LEN]);
        hk.expand(&scoped, okm.as_mut())
            .map_err(|_| CryptoError::KeyGen("hkdf expand failed".into()))?;
        scoped.zeroize();
        Ok(okm)
    };

    let initiator_to_responder = derive(b"/init->resp")?;
    let responder_to_initiator = derive(b"/resp->init")?;
    info.zeroize();

    Ok(if initiator {
        DirectionalKeys {
            send: initiator_to_responder,
            recv: responder_to_initiator,
        }
    } else {
        DirectionalKeys {
            send: responder_to_initiator,
            recv: initiator_to_responder,
        }
    })
}

/// AES-256-GCM seal. Returns ciphertext with the 16-byte tag appended.
pub fn aead_seal(
    key: &[u8; AEAD_KEY_LEN],
    nonce: &[u8; AEAD_NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AeadFailure)
}

/// AES-256-GCM open. Fails on any tampering of ciphertext, nonce or AAD.
pub fn aead_open(
    key: &[u8; AEAD_KEY_LEN],
    nonce: &[u8; AEAD_NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AeadFailure)
}

/// Maps a strictly monotonic frame counter into a 12-byte nonce.
pub fn counter_nonce(counter: u64) -> [u8; AEAD_NONCE_LEN] {
    let mut nonce = [0u8; AEAD_NONCE_LEN];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}
