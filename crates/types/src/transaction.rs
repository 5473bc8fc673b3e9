//! Transaction, receipt and log records with their canonical encodings.

use crate::codec::{from_bytes_canonical, to_bytes_canonical, Decode, Encode, Reader, Writer};
use crate::error::CodecError;
use crate::primitives::{Address, Ed25519PublicKey, Ed25519Signature, Hash256, U256};

/// Cap on the payload of a single transaction (128 KiB).
pub const MAX_TX_DATA: usize = 128 * 1024;
/// Cap on a single log's data payload.
pub const MAX_LOG_DATA: usize = 4 * 1024;
/// Cap on topics per log.
pub const MAX_LOG_TOPICS: usize = 8;
/// Cap on logs per receipt.
pub const MAX_LOGS_PER_RECEIPT: usize = 256;
/// Cap on compliance proofs per transaction.
pub const MAX_COMPLIANCE_PROOFS: usize = 16;
/// Cap on a single compliance proof blob.
pub const MAX_PROOF_BYTES: usize = 16 * 1024;
/// Cap on public inputs per compliance proof.
pub const MAX_PUBLIC_INPUTS: usize = 16;

/// The seven transaction kinds understood by the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    Transfer,
    ContractDeploy,
    ContractCall,
    ValidatorRegister,
    ValidatorExit,
    StakeDeposit,
    StakeWithdraw,
}

impl TxKind {
    pub fn tag(self) -> u8 {
        match self {
            Self::Transfer => 0,
            Self::ContractDeploy => 1,
            Self::ContractCall => 2,
            Self::ValidatorRegister => 3,
            Self::ValidatorExit => 4,
            Self::StakeDeposit => 5,
            Self::StakeWithdraw => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        Ok(match tag {
            0 => Self::Transfer,
            1 => Self::ContractDeploy,
            2 => Self::ContractCall,
            3 => Self::ValidatorRegister,
            4 => Self::ValidatorExit,
            5 => Self::StakeDeposit,
            6 => Self::StakeWithdraw,
            other => return Err(CodecError::InvalidValue(format!("tx kind tag {other}"))),
        })
    }
}

impl Encode for TxKind {
    fn encode(&self, w: &mut Writer) {
        w.put_u8(self.tag());
    }
}

impl Decode for TxKind {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Self::from_tag(r.read_u8()?)
    }
}

/// A zero-knowledge compliance proof attached to a transaction.
///
/// The nullifier is recorded in the per-block set only after the proof
/// verifies; a failed verification never burns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceProof {
    pub schema_id: u32,
    pub nullifier: Hash256,
    pub proof_bytes: Vec<u8>,
    pub public_inputs: Vec<Vec<u8>>,
}

impl Encode for ComplianceProof {
    fn encode(&self, w: &mut Writer) {
        w.put_u32(self.schema_id);
        self.nullifier.encode(w);
        w.put_bytes(&self.proof_bytes);
        w.put_varint(self.public_inputs.len() as u64);
        for input in &self.public_inputs {
            w.put_bytes(input);
        }
    }
}

impl Decode for ComplianceProof {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let schema_id = r.read_u32()?;
        let nullifier = Hash256::decode(r)?;
        let proof_bytes = r.read_bytes_capped(MAX_PROOF_BYTES)?;
        let count = r.read_count_capped(MAX_PUBLIC_INPUTS)?;
        let mut public_inputs = Vec::with_capacity(count);
        for _ in 0..count {
            public_inputs.push(r.read_bytes_capped(MAX_PROOF_BYTES)?);
        }
        Ok(Self {
            schema_id,
            nullifier,
            proof_bytes,
            public_inputs,
        })
    }
}

/// A signed transaction. The signature covers [`Transaction::signing_bytes`]
/// plus the BLAKE3 digest of the compliance proof list, computed by the
/// crypto layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub kind: TxKind,
    pub nonce: u64,
    pub sender: Address,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
    pub gas_limit: u64,
    /// Legacy single-price field; the fee market uses the two caps below.
    pub gas_price: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub chain_id: u32,
    pub priority: u8,
    pub compliance_proofs: Vec<ComplianceProof>,
    pub signature: Ed25519Signature,
    pub sender_public_key: Ed25519PublicKey,
}

impl Transaction {
    /// Canonical encoding of every signed field except the signature and the
    /// proof list. The proofs enter the signed payload as a digest so that
    /// the payload stays small; the crypto layer appends it.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(128 + self.data.len());
        self.kind.encode(&mut w);
        w.put_u64(self.nonce);
        self.sender.encode(&mut w);
        self.to.encode(&mut w);
        self.value.encode(&mut w);
        w.put_bytes(&self.data);
        w.put_u64(self.gas_limit);
        self.gas_price.encode(&mut w);
        self.max_fee_per_gas.encode(&mut w);
        self.max_priority_fee_per_gas.encode(&mut w);
        w.put_u32(self.chain_id);
        w.put_u8(self.priority);
        self.sender_public_key.encode(&mut w);
        w.into_bytes()
    }

    /// Canonical encoding of the proof list, hashed into the signed payload.
    pub fn proofs_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(&self.compliance_proofs)
    }

    /// The effective per-gas price under a given base fee:
    /// `min(max_fee, base_fee + max_priority)`.
    pub fn effective_gas_price(&self, base_fee: U256) -> Option<U256> {
        let tip_capped = base_fee.checked_add(self.max_priority_fee_per_gas)?;
        Some(self.max_fee_per_gas.min(tip_capped))
    }

    /// The tip this transaction pays over a given base fee, used for fee
    /// ordering. `None` when the transaction cannot cover the base fee.
    pub fn effective_tip(&self, base_fee: U256) -> Option<U256> {
        if self.max_fee_per_gas < base_fee {
            return None;
        }
        Some(self.max_priority_fee_per_gas.min(self.max_fee_per_gas - base_fee))
    }
}

impl Encode for Transaction {
    fn encode(&self, w: &mut Writer) {
        self.kind.encode(w);
        w.put_u64(self.nonce);
        self.sender.encode(w);
        self.to.encode(w);
        self.value.encode(w);
        w.put_bytes(&self.data);
        w.put_u64(self.gas_limit);
        self.gas_price.encode(w);
        self.max_fee_per_gas.encode(w);
        self.max_priority_fee_per_gas.encode(w);
        w.put_u32(self.chain_id);
        w.put_u8(self.priority);
        self.compliance_proofs.encode(w);
        self.signature.encode(w);
        self.sender_public_key.encode(w);
    }
}

impl Decode for Transaction {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let kind = TxKind::decode(r)?;
        let nonce = r.read_u64()?;
        let sender = Address::decode(r)?;
        let to = Address::decode(r)?;
        let value = U256::decode(r)?;
        let data = r.read_bytes_capped(MAX_TX_DATA)?;
        let gas_limit = r.read_u64()?;
        let gas_price = U256::decode(r)?;
        let max_fee_per_gas = U256::decode(r)?;
        let max_priority_fee_per_gas = U256::decode(r)?;
        let chain_id = r.read_u32()?;
        let priority = r.read_u8()?;
        let proof_count = r.read_count_capped(MAX_COMPLIANCE_PROOFS)?;
        let mut compliance_proofs = Vec::with_capacity(proof_count);
        for _ in 0..proof_count {
            compliance_proofs.push(ComplianceProof::decode(r)?);
        }
        let signature = Ed25519Signature::decode(r)?;
        let sender_public_key = Ed25519PublicKey::decode(r)?;
        Ok(Self {
            kind,
            nonce,
            sender,
            to,
            value,
            data,
            gas_limit,
            gas_price,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            chain_id,
            priority,
            compliance_proofs,
            signature,
            sender_public_key,
        })
    }
}

/// An event emitted during contract execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash256>,
    pub data: Vec<u8>,
    /// Monotonically increasing within one transaction, in emission order.
    pub index: u32,
}

impl Encode for Log {
    fn encode(&self, w: &mut Writer) {
        self.address.encode(w);
        self.topics.encode(w);
        w.put_bytes(&self.data);
        w.put_u32(self.index);
    }
}

impl Decode for Log {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let address = Address::decode(r)?;
        let topic_count = r.read_count_capped(MAX_LOG_TOPICS)?;
        let mut topics = Vec::with_capacity(topic_count);
        for _ in 0..topic_count {
            topics.push(Hash256::decode(r)?);
        }
        let data = r.read_bytes_capped(MAX_LOG_DATA)?;
        let index = r.read_u32()?;
        Ok(Self {
            address,
            topics,
            data,
            index,
        })
    }
}

/// The result of executing one transaction.
///
/// `post_state_root` is never computed inside the execution loop; it stays
/// zero until the block builder backfills it once at end-of-block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub success: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub effective_gas_price: U256,
    pub post_state_root: Hash256,
    pub logs: Vec<Log>,
    pub block_hash: Hash256,
    pub tx_index: u32,
}

impl Encode for Receipt {
    fn encode(&self, w: &mut Writer) {
        self.success.encode(w);
        w.put_u64(self.gas_used);
        w.put_u64(self.cumulative_gas_used);
        self.effective_gas_price.encode(w);
        self.post_state_root.encode(w);
        self.logs.encode(w);
        self.block_hash.encode(w);
        w.put_u32(self.tx_index);
    }
}

impl Decode for Receipt {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let success = bool::decode(r)?;
        let gas_used = r.read_u64()?;
        let cumulative_gas_used = r.read_u64()?;
        let effective_gas_price = U256::decode(r)?;
        let post_state_root = Hash256::decode(r)?;
        let log_count = r.read_count_capped(MAX_LOGS_PER_RECEIPT)?;
        let mut logs = Vec::with_capacity(log_count);
        for _ in 0..log_count {
            logs.push(Log::decode(r)?);
        }
        let block_hash = Hash256::decode(r)?;
        let tx_index = r.read_u32()?;
        Ok(Self {
            success,
            gas_used,
            cumulative_gas_used,
            effective_gas_price,
            post_state_root,
            logs,
            block_hash,
            tx_index,
        })
    }
}

/// Round-trip helper used by stores; kept here so the encoding stays next to
/// the type definitions.
pub fn decode_transaction(bytes: &[u8]) -> Result<Transaction, CodecError> {
    from_bytes_canonical(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_bytes_canonical, to_bytes_canonical};

    pub(crate) fn sample_tx() -> Transaction {
        Transaction {
            kind: TxKind::Transfer,
            nonce: 7,
            sender: Address([0x11; 20]),
            to: Address([0x22; 20]),
            value: U256::from(1_000u64),
            data: vec![1, 2, 3],
            gas_limit: 21_000,
            gas_price: U256::zero(),
            max_fee_per_gas: U256::from(100u64),
            max_priority_fee_per_gas: U256::from(2u64),
            chain_id: 100,
            priority: 0,
            compliance_proofs: vec![],
            signature: Ed25519Signature([0x33; 64]),
            sender_public_key: Ed25519PublicKey([0x44; 32]),
        }
    }

    #[test]
    fn transaction_roundtrip() {
        let tx = sample_tx();
        let bytes = to_bytes_canonical(&tx);
        let decoded = from_bytes_canonical::<Transaction>(&bytes).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn signing_bytes_exclude_signature() {
        let mut tx = sample_tx();
        let unsigned = tx.signing_bytes();
        tx.signature = Ed25519Signature([0xaa; 64]);
        assert_eq!(unsigned, tx.signing_bytes());

        // The priority byte is part of the signed payload.
        tx.priority = 9;
        assert_ne!(unsigned, tx.signing_bytes());
    }

    #[test]
    fn oversized_data_is_rejected_on_decode() {
        let mut tx = sample_tx();
        tx.data = vec![0u8; MAX_TX_DATA + 1];
        let bytes = to_bytes_canonical(&tx);
        assert!(from_bytes_canonical::<Transaction>(&bytes).is_err());
    }

    #[test]
    fn effective_gas_price_is_capped_by_max_fee() {
        let tx = sample_tx();
        // base 10 + tip 2 = 12, under the cap of 100.
        assert_eq!(
            tx.effective_gas_price(U256::from(10u64)).unwrap(),
            U256::from(12u64)
        );
        // base 99 + tip 2 would exceed the cap.
        assert_eq!(
            tx.effective_gas_price(U256::from(99u64)).unwrap(),
            U256::from(100u64)
        );
        // Cannot cover the base fee at all.
        assert_eq!(tx.effective_tip(U256::from(200u64)), None);
    }

    #[test]
    fn receipt_roundtrip_with_logs() {
        let receipt = Receipt {
            success: false,
            gas_used: 21_000,
            cumulative_gas_used: 42_000,
            effective_gas_price: U256::from(12u64),
            post_state_root: Hash256::ZERO,
            logs: vec![Log {
                address: Address([9; 20]),
                topics: vec![Hash256([1; 32]), Hash256([2; 32])],
                data: vec![0xde, 0xad],
                index: 0,
            }],
            block_hash: Hash256([7; 32]),
            tx_index: 1,
        };
        let bytes = to_bytes_canonical(&receipt);
        assert_eq!(from_bytes_canonical::<Receipt>(&bytes).unwrap(), receipt);
    }
}
