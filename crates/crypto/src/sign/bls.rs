//! BLS12-381 signatures in the min-pk configuration: public keys are
//! 48-byte compressed G1 points, signatures 96-byte compressed G2 points.
//!
//! Every point deserialized from untrusted bytes is checked for curve
//! membership, prime-order subgroup membership and — where it stands for a
//! proof element — rejection of the identity point. Secret scalars come out
//! of `blst`'s keygen, which performs proper modular reduction.

use crate::error::CryptoError;
use basalt_types::{BlsPublicKey, BlsSignature};
use blst::min_pk::{AggregatePublicKey, AggregateSignature, PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand::RngCore;
use zeroize::Zeroizing;

/// Ciphersuite domain separation tag (signatures in G2, SHA-256 expansion).
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

/// A BLS secret key. `blst` zeroizes the scalar on drop.
pub struct BlsSecretKey(SecretKey);

impl BlsSecretKey {
    /// Generates a key from 32 bytes of OS entropy via the RFC 9380 keygen
    /// (hash-to-scalar with modular reduction; never ad-hoc masking).
    pub fn generate() -> Result<Self, CryptoError> {
        let mut ikm = Zeroizing::new([0u8; 32]);
        rand::rngs::OsRng.fill_bytes(ikm.as_mut());
        SecretKey::key_gen(ikm.as_ref(), &[])
            .map(Self)
            .map_err(|e| CryptoError::KeyGen(format!("{e:?}")))
    }

    /// Deterministic keygen from a 32-byte seed (tests and keystore reload).
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, CryptoError> {
        SecretKey::key_gen(seed, &[])
            .map(Self)
            .map_err(|e| CryptoError::KeyGen(format!("{e:?}")))
    }

    /// Restores a key from its 32-byte scalar encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::LengthMismatch {
                expected: 32,
                got: bytes.len(),
            });
        }
        SecretKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPoint)
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.0.to_bytes())
    }

    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey(self.0.sk_to_pk().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        BlsSignature(self.0.sign(message, DST, &[]).to_bytes())
    }
}

/// Deserializes and fully validates a public key: on curve, in the subgroup,
/// and not the identity.
fn parse_public_key(key: &BlsPublicKey) -> Result<PublicKey, CryptoError> {
    // key_validate performs the subgroup and infinity checks on top of
    // deserialization.
    PublicKey::key_validate(&key.0).map_err(|e| match e {
        BLST_ERROR::BLST_PK_IS_INFINITY => CryptoError::IdentityPoint,
        BLST_ERROR::BLST_POINT_NOT_IN_GROUP => CryptoError::NotInSubgroup,
        _ => CryptoError::InvalidPoint,
    })
}

/// Deserializes and fully validates a signature point.
fn parse_signature(sig: &BlsSignature) -> Result<Signature, CryptoError> {
    Signature::sig_validate(&sig.0, true).map_err(|e| match e {
        BLST_ERROR::BLST_PK_IS_INFINITY => CryptoError::IdentityPoint,
        BLST_ERROR::BLST_POINT_NOT_IN_GROUP => CryptoError::NotInSubgroup,
        _ => CryptoError::InvalidPoint,
    })
}

/// Single-signature verification. Total over untrusted inputs.
pub fn verify(
    public_key: &BlsPublicKey,
    message: &[u8],
    signature: &BlsSignature,
) -> Result<(), CryptoError> {
    let pk = parse_public_key(public_key)?;
    let sig = parse_signature(signature)?;
    match sig.verify(false, message, DST, &[], &pk, false) {
        BLST_ERROR::BLST_SUCCESS => Ok(()),
        _ => Err(CryptoError::SignatureInvalid),
    }
}

/// Aggregates individual signatures into one. The inputs have already been
/// group-checked if they came through [`parse_signature`]; aggregation
/// re-checks to stay safe when callers pass stored bytes.
pub fn aggregate_signatures(signatures: &[BlsSignature]) -> Result<BlsSignature, CryptoError> {
    if signatures.is_empty() {
        return Err(CryptoError::EmptyAggregation);
    }
    let parsed: Vec<Signature> = signatures
        .iter()
        .map(parse_signature)
        .collect::<Result<_, _>>()?;
    let refs: Vec<&Signature> = parsed.iter().collect();
    let agg = AggregateSignature::aggregate(&refs, false)
        .map_err(|_| CryptoError::InvalidPoint)?;
    Ok(BlsSignature(agg.to_signature().to_bytes()))
}

/// Aggregates public keys, as used to verify a quorum certificate whose
/// signer set is known from the bitmap.
pub fn aggregate_public_keys(keys: &[BlsPublicKey]) -> Result<BlsPublicKey, CryptoError> {
    if keys.is_empty() {
        return Err(CryptoError::EmptyAggregation);
    }
    let parsed: Vec<PublicKey> = keys.iter().map(parse_public_key).collect::<Result<_, _>>()?;
    let refs: Vec<&PublicKey> = parsed.iter().collect();
    let agg =
        AggregatePublicKey::aggregate(&refs, false).map_err(|_| CryptoError::InvalidPoint)?;
    Ok(BlsPublicKey(agg.to_public_key().to_bytes()))
}

/// Verifies an aggregate signature where every signer signed the same
/// message — the quorum-certificate fast path.
pub fn aggregate_verify_same_msg(
    public_keys: &[BlsPublicKey],
    message: &[u8],
    signature: &BlsSignature,
) -> Result<(), CryptoError> {
    if public_keys.is_empty() {
        return Err(CryptoError::EmptyAggregation);
    }
    let parsed: Vec<PublicKey> = public_keys
        .iter()
        .map(parse_public_key)
        .collect::<Result<_, _>>()?;
    let refs: Vec<&PublicKey> = parsed.iter().collect();
    let sig = parse_signature(signature)?;
    match sig.fast_aggregate_verify(false, message, DST, &refs) {
        BLST_ERROR::BLST_SUCCESS => Ok(()),
        _ => Err(CryptoError::SignatureInvalid),
    }
}

/// Verifies an aggregate signature over distinct messages.
pub fn aggregate_verify(
    public_keys: &[BlsPublicKey],
    messages: &[&[u8]],
    signature: &BlsSignature,
) -> Result<(), CryptoError> {
    if public_keys.is_empty() || public_keys.len() != messages.len() {
        return Err(CryptoError::LengthMismatch {
            expected: public_keys.len(),
            got: messages.len(),
        });
    }
    let parsed: Vec<PublicKey> = public_keys
        .iter()
        .map(parse_public_key)
        .collect::<Result<_, _>>()?;
    let refs: Vec<&PublicKey> = parsed.iter().collect();
    let sig = parse_signature(signature)?;
    match sig.aggregate_verify(false, messages, DST, &refs, false) {
        BLST_ERROR::BLST_SUCCESS => Ok(()),
        _ => Err(CryptoError::SignatureInvalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(seed: u8) -> (BlsSecretKey, BlsPublicKey) {
        let sk = BlsSecretKey::from_seed(&[seed; 32]).unwrap();
        let pk = sk.public_key();
        (sk, pk)
    }

    #[test]
    fn sign_and_verify() {
        let (sk, pk) = keypair(1);
        let sig = sk.sign(b"consensus payload");
        assert!(verify(&pk, b"consensus payload", &sig).is_ok());
        assert_eq!(
            verify(&pk, b"tampered", &sig),
            Err(CryptoError::SignatureInvalid)
        );
    }

    #[test]
    fn aggregate_same_message_verifies() {
        let message = b"qc payload";
        let pairs: Vec<_> = (1..=4).map(keypair).collect();
        let sigs: Vec<BlsSignature> = pairs.iter().map(|(sk, _)| sk.sign(message)).collect();
        let pks: Vec<BlsPublicKey> = pairs.iter().map(|(_, pk)| *pk).collect();

        let agg = aggregate_signatures(&sigs).unwrap();
        assert!(aggregate_verify_same_msg(&pks, message, &agg).is_ok());

        // Dropping one signer from the key set must fail.
        assert!(aggregate_verify_same_msg(&pks[..3], message, &agg).is_err());
    }

    #[test]
    fn aggregate_distinct_messages_verifies() {
        let pairs: Vec<_> = (1..=3).map(keypair).collect();
        let messages: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i; 8]).collect();
        let sigs: Vec<BlsSignature> = pairs
            .iter()
            .zip(&messages)
            .map(|((sk, _), m)| sk.sign(m))
            .collect();
        let pks: Vec<BlsPublicKey> = pairs.iter().map(|(_, pk)| *pk).collect();
        let refs: Vec<&[u8]> = messages.iter().map(|m| m.as_slice()).collect();

        let agg = aggregate_signatures(&sigs).unwrap();
        assert!(aggregate_verify(&pks, &refs, &agg).is_ok());
    }

    #[test]
    fn identity_public_key_is_rejected() {
        // The compressed identity in G1: 0xc0 followed by zeros.
        let mut identity = [0u8; 48];
        identity[0] = 0xc0;
        let err = verify(&BlsPublicKey(identity), b"m", &BlsSignature([0u8; 96]));
        assert_eq!(err, Err(CryptoError::IdentityPoint));
    }

    #[test]
    fn garbage_points_are_rejected() {
        let err = parse_public_key(&BlsPublicKey([0x11; 48]));
        assert!(err.is_err());
        let err = parse_signature(&BlsSignature([0x22; 96]));
        assert!(err.is_err());
    }

    #[test]
    fn empty_aggregation_is_an_error() {
        assert_eq!(
            aggregate_signatures(&[]),
            Err(CryptoError::EmptyAggregation)
        );
    }
}
