//! Block and header records with their canonical encodings.

use crate::codec::{Decode, Encode, Reader, Writer};
use crate::error::CodecError;
use crate::primitives::{Address, Hash256, U256};
use crate::transaction::Transaction;

/// Cap on the free-form `extra_data` field (32 KiB).
pub const MAX_EXTRA_DATA: usize = 32 * 1024;
/// Cap on transactions per block, enforced before decode allocation.
pub const MAX_TXS_PER_BLOCK: usize = 16_384;

/// Account snapshot stored in the world state. Updates always produce a new
/// value; a stored snapshot is never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountState {
    pub balance: U256,
    pub nonce: u64,
    pub code_hash: Hash256,
    pub storage_root: Hash256,
}

impl Encode for AccountState {
    fn encode(&self, w: &mut Writer) {
        self.balance.encode(w);
        w.put_u64(self.nonce);
        self.code_hash.encode(w);
        self.storage_root.encode(w);
    }
}

impl Decode for AccountState {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            balance: U256::decode(r)?,
            nonce: r.read_u64()?,
            code_hash: Hash256::decode(r)?,
            storage_root: Hash256::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub parent_hash: Hash256,
    pub chain_id: u32,
    pub timestamp_ms: u64,
    pub state_root: Hash256,
    pub tx_root: Hash256,
    pub receipts_root: Hash256,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub base_fee: U256,
    pub proposer: Address,
    pub extra_data: Vec<u8>,
    pub protocol_version: u16,
}

impl Encode for BlockHeader {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.number);
        self.parent_hash.encode(w);
        w.put_u32(self.chain_id);
        w.put_u64(self.timestamp_ms);
        self.state_root.encode(w);
        self.tx_root.encode(w);
        self.receipts_root.encode(w);
        w.put_u64(self.gas_used);
        w.put_u64(self.gas_limit);
        self.base_fee.encode(w);
        self.proposer.encode(w);
        w.put_bytes(&self.extra_data);
        w.put_u16(self.protocol_version);
    }
}

impl Decode for BlockHeader {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            number: r.read_u64()?,
            parent_hash: Hash256::decode(r)?,
            chain_id: r.read_u32()?,
            timestamp_ms: r.read_u64()?,
            state_root: Hash256::decode(r)?,
            tx_root: Hash256::decode(r)?,
            receipts_root: Hash256::decode(r)?,
            gas_used: r.read_u64()?,
            gas_limit: r.read_u64()?,
            base_fee: U256::decode(r)?,
            proposer: Address::decode(r)?,
            extra_data: r.read_bytes_capped(MAX_EXTRA_DATA)?,
            protocol_version: r.read_u16()?,
        })
    }
}

/// A full block: header, ordered transactions, and the bitmap of validators
/// that signed the COMMIT quorum certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// Bit `i` set means the validator at index `i` of the epoch's set
    /// contributed to the COMMIT certificate.
    pub commit_bitmap: u64,
}

impl Encode for Block {
    fn encode(&self, w: &mut Writer) {
        self.header.encode(w);
        w.put_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode(w);
        }
        w.put_u64(self.commit_bitmap);
    }
}

impl Decode for Block {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let header = BlockHeader::decode(r)?;
        let count = r.read_count_capped(MAX_TXS_PER_BLOCK)?;
        let mut transactions = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            transactions.push(Transaction::decode(r)?);
        }
        let commit_bitmap = r.read_u64()?;
        Ok(Self {
            header,
            transactions,
            commit_bitmap,
        })
    }
}
