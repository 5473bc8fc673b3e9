//! Cryptographic primitives for the Basalt node: Ed25519 identity
//! signatures, BLS12-381 aggregation for consensus, BLAKE3 and Keccak-256
//! hashing, channel key derivation, and the encrypted validator keystore.

pub mod aead;
pub mod error;
pub mod hash;
pub mod identity;
pub mod keystore;
pub mod sign;

pub use aead::{
    aead_open, aead_seal, counter_nonce, derive_directional_keys, ephemeral_binding,
    ephemeral_keypair, DirectionalKeys, EphemeralSecret, SharedSecret, X25519PublicKey,
    AEAD_NONCE_LEN, AEAD_TAG_LEN, PROTOCOL_TAG,
};
pub use error::CryptoError;
pub use hash::{blake3_hash, block_hash, derive_address, derive_peer_id, keccak256, Blake3Incremental};
pub use identity::{random_nonce, ValidatorKeys};
pub use keystore::{KeystoreFile, SensitiveBytes};
pub use sign::{
    bls, eddsa, sign_transaction, transaction_hash, transaction_signing_payload,
    verify_transaction_signature,
};
