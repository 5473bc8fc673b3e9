//! Error type for the crypto layer.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// A key or signature had the wrong number of bytes.
    #[error("length mismatch: expected {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    /// Bytes did not deserialize to a point on the curve.
    #[error("invalid curve point")]
    InvalidPoint,
    /// The point is on the curve but outside the prime-order subgroup.
    #[error("point not in the prime-order subgroup")]
    NotInSubgroup,
    /// The identity point was supplied where a proof element is required.
    #[error("identity point rejected")]
    IdentityPoint,
    /// A signature failed verification.
    #[error("signature verification failed")]
    SignatureInvalid,
    /// Nothing to aggregate.
    #[error("empty aggregation input")]
    EmptyAggregation,
    /// AEAD open failed (wrong key, nonce or tampered ciphertext).
    #[error("authenticated decryption failed")]
    AeadFailure,
    /// The keystore file version is not supported.
    #[error("unsupported keystore version {0}")]
    KeystoreVersion(u32),
    /// The keystore KDF parameters are below the enforced minimums.
    #[error("keystore parameters below minimum: {0}")]
    BadKeystoreParameters(String),
    /// Keystore file I/O failed.
    #[error("keystore io error: {0}")]
    KeystoreIo(String),
    /// Keystore JSON was malformed.
    #[error("keystore format error: {0}")]
    KeystoreFormat(String),
    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGen(String),
}
