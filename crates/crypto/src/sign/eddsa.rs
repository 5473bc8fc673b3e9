//! Ed25519 identity signatures.
//!
//! Verification is total: malformed keys or signatures report failure, they
//! never panic. Strict verification is used throughout to reject malleable
//! signatures.

use crate::error::CryptoError;
use basalt_types::{Ed25519PublicKey, Ed25519Signature};
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use rand::rngs::OsRng;

pub use ed25519_dalek::SigningKey;

/// Generates a fresh signing key from the OS RNG.
pub fn generate_keypair() -> (SigningKey, Ed25519PublicKey) {
    let signing = SigningKey::generate(&mut OsRng);
    let public = Ed25519PublicKey(signing.verifying_key().to_bytes());
    (signing, public)
}

/// Rebuilds a signing key from its 32-byte seed.
pub fn keypair_from_seed(seed: &[u8; 32]) -> (SigningKey, Ed25519PublicKey) {
    let signing = SigningKey::from_bytes(seed);
    let public = Ed25519PublicKey(signing.verifying_key().to_bytes());
    (signing, public)
}

pub fn sign(key: &SigningKey, message: &[u8]) -> Ed25519Signature {
    Ed25519Signature(key.sign(message).to_bytes())
}

/// Total verification: any parse failure is just `false`.
pub fn verify(public_key: &Ed25519PublicKey, message: &[u8], signature: &Ed25519Signature) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let sig = Signature::from_bytes(&signature.0);
    key.verify_strict(message, &sig).is_ok()
}

/// Batch verification for mempool admission. Falls back to `false` on the
/// first malformed key; the caller then re-checks individually to find the
/// offender.
pub fn verify_batch(
    messages: &[&[u8]],
    signatures: &[Ed25519Signature],
    public_keys: &[Ed25519PublicKey],
) -> Result<bool, CryptoError> {
    if messages.len() != signatures.len() || messages.len() != public_keys.len() {
        return Err(CryptoError::LengthMismatch {
            expected: messages.len(),
            got: signatures.len().max(public_keys.len()),
        });
    }
    if messages.is_empty() {
        return Ok(true);
    }
    let mut keys = Vec::with_capacity(public_keys.len());
    for pk in public_keys {
        match VerifyingKey::from_bytes(&pk.0) {
            Ok(k) => keys.push(k),
            Err(_) => return Ok(false),
        }
    }
    let sigs: Vec<Signature> = signatures
        .iter()
        .map(|s| Signature::from_bytes(&s.0))
        .collect();
    Ok(ed25519_dalek::verify_batch(messages, &sigs, &keys).is_ok())
}

/// Verifies using the plain (non-strict) rules; used only where an external
/// protocol requires it. Consensus and transport use [`verify`].
pub fn verify_lenient(
    public_key: &Ed25519PublicKey,
    message: &[u8],
    signature: &Ed25519Signature,
) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let sig = Signature::from_bytes(&signature.0);
    key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let (key, public) = generate_keypair();
        let sig = sign(&key, b"payload");
        assert!(verify(&public, b"payload", &sig));
        assert!(!verify(&public, b"other payload", &sig));
    }

    #[test]
    fn verify_is_total_on_garbage_key() {
        // Not a valid curve point; must return false, not panic.
        let bogus = Ed25519PublicKey([0xff; 32]);
        assert!(!verify(&bogus, b"x", &Ed25519Signature([0u8; 64])));
    }

    #[test]
    fn seed_roundtrip_is_deterministic() {
        let seed = [42u8; 32];
        let (a, pa) = keypair_from_seed(&seed);
        let (b, pb) = keypair_from_seed(&seed);
        assert_eq!(pa, pb);
        assert_eq!(sign(&a, b"m"), sign(&b, b"m"));
    }

    #[test]
    fn batch_verification() {
        let (k1, p1) = generate_keypair();
        let (k2, p2) = generate_keypair();
        let m1: &[u8] = b"first";
        let m2: &[u8] = b"second";
        let s1 = sign(&k1, m1);
        let s2 = sign(&k2, m2);

        assert!(verify_batch(&[m1, m2], &[s1, s2], &[p1, p2]).unwrap());
        // Swapped signatures fail as a batch.
        assert!(!verify_batch(&[m1, m2], &[s2, s1], &[p1, p2]).unwrap());
        // Mismatched input lengths are an error, not a verdict.
        assert!(verify_batch(&[m1], &[s1, s2], &[p1, p2]).is_err());
    }
}
