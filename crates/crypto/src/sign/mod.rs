//! Signature algorithms and the transaction signing payload.

pub mod bls;
pub mod eddsa;

use crate::error::CryptoError;
use crate::hash::{blake3_hash, derive_address};
use basalt_types::{to_bytes_canonical, Hash256, Transaction};
use ed25519_dalek::SigningKey;

/// The exact bytes a transaction signature covers: the canonical encoding of
/// every field except the signature, followed by the BLAKE3 digest of the
/// canonical compliance-proof encoding.
pub fn transaction_signing_payload(tx: &Transaction) -> Vec<u8> {
    let mut payload = tx.signing_bytes();
    let proofs_digest = blake3_hash(&tx.proofs_bytes());
    payload.extend_from_slice(&proofs_digest.0);
    payload
}

/// A transaction's identifier: BLAKE3 over its full canonical encoding.
pub fn transaction_hash(tx: &Transaction) -> Hash256 {
    blake3_hash(&to_bytes_canonical(tx))
}

/// Signs a transaction in place and stamps the sender fields derived from
/// the key.
pub fn sign_transaction(tx: &mut Transaction, key: &SigningKey) {
    let public = basalt_types::Ed25519PublicKey(key.verifying_key().to_bytes());
    tx.sender_public_key = public;
    tx.sender = derive_address(&public);
    let payload = transaction_signing_payload(tx);
    tx.signature = eddsa::sign(key, &payload);
}

/// Checks the signature and that the sender address matches the embedded
/// public key.
pub fn verify_transaction_signature(tx: &Transaction) -> Result<(), CryptoError> {
    if derive_address(&tx.sender_public_key) != tx.sender {
        return Err(CryptoError::SignatureInvalid);
    }
    let payload = transaction_signing_payload(tx);
    if eddsa::verify(&tx.sender_public_key, &payload, &tx.signature) {
        Ok(())
    } else {
        Err(CryptoError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_types::{Address, TxKind, U256};

    fn unsigned_tx() -> Transaction {
        Transaction {
            kind: TxKind::Transfer,
            nonce: 0,
            sender: Address::ZERO,
            to: Address([2; 20]),
            value: U256::from(10u64),
            data: vec![],
            gas_limit: 21_000,
            gas_price: U256::zero(),
            max_fee_per_gas: U256::from(5u64),
            max_priority_fee_per_gas: U256::from(1u64),
            chain_id: 100,
            priority: 0,
            compliance_proofs: vec![],
            signature: basalt_types::Ed25519Signature([0; 64]),
            sender_public_key: basalt_types::Ed25519PublicKey([0; 32]),
        }
    }

    #[test]
    fn sign_verify_roundtrip() {
        let (key, _) = eddsa::generate_keypair();
        let mut tx = unsigned_tx();
        sign_transaction(&mut tx, &key);
        assert!(verify_transaction_signature(&tx).is_ok());

        // Any mutation of a signed field invalidates the signature.
        tx.value = U256::from(11u64);
        assert!(verify_transaction_signature(&tx).is_err());
    }

    #[test]
    fn sender_must_match_public_key() {
        let (key, _) = eddsa::generate_keypair();
        let mut tx = unsigned_tx();
        sign_transaction(&mut tx, &key);
        tx.sender = Address([0xee; 20]);
        assert!(verify_transaction_signature(&tx).is_err());
    }

    #[test]
    fn tx_hash_commits_to_signature() {
        let (key, _) = eddsa::generate_keypair();
        let mut tx = unsigned_tx();
        sign_transaction(&mut tx, &key);
        let h1 = transaction_hash(&tx);
        tx.signature = basalt_types::Ed25519Signature([9; 64]);
        assert_ne!(h1, transaction_hash(&tx));
    }
}
