//! Receipt, transaction-index and log-index persistence.

use crate::db::{CommitBatch, Database, CF_LOGS, CF_RECEIPTS, CF_TX_INDEX};
use basalt_types::{from_bytes_canonical, to_bytes_canonical, Hash256, Receipt, StorageError};
use std::sync::Arc;

/// Where a transaction landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLocation {
    pub block_hash: Hash256,
    pub index: u32,
}

pub struct ReceiptStore {
    db: Arc<Database>,
}

impl ReceiptStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Stages one block's receipts, transaction index entries and log index
    /// entries into an open batch.
    pub fn stage_block_receipts(
        &self,
        batch: &mut CommitBatch<'_>,
        block_hash: Hash256,
        block_number: u64,
        tx_hashes: &[Hash256],
        receipts: &[Receipt],
    ) -> Result<(), StorageError> {
        debug_assert_eq!(tx_hashes.len(), receipts.len());
        for (tx_hash, receipt) in tx_hashes.iter().zip(receipts) {
            batch.put(CF_RECEIPTS, &tx_hash.0, &to_bytes_canonical(receipt))?;

            let mut location = [0u8; 36];
            location[..32].copy_from_slice(&block_hash.0);
            location[32..].copy_from_slice(&receipt.tx_index.to_le_bytes());
            batch.put(CF_TX_INDEX, &tx_hash.0, &location)?;

            for log in &receipt.logs {
                let topic0 = log.topics.first().copied().unwrap_or(Hash256::ZERO);
                // contract || topic0 || block number || tx index || log index
                let mut key = Vec::with_capacity(20 + 32 + 8 + 4 + 4);
                key.extend_from_slice(&log.address.0);
                key.extend_from_slice(&topic0.0);
                key.extend_from_slice(&block_number.to_le_bytes());
                key.extend_from_slice(&receipt.tx_index.to_le_bytes());
                key.extend_from_slice(&log.index.to_le_bytes());
                batch.put(CF_LOGS, &key, &tx_hash.0)?;
            }
        }
        Ok(())
    }

    pub fn receipt(&self, tx_hash: &Hash256) -> Result<Option<Receipt>, StorageError> {
        match self.db.get(CF_RECEIPTS, &tx_hash.0)? {
            Some(raw) => from_bytes_canonical::<Receipt>(&raw)
                .map(Some)
                .map_err(|e| StorageError::Corruption(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn tx_location(&self, tx_hash: &Hash256) -> Result<Option<TxLocation>, StorageError> {
        match self.db.get(CF_TX_INDEX, &tx_hash.0)? {
            Some(raw) if raw.len() == 36 => Ok(Some(TxLocation {
                block_hash: Hash256::try_from(&raw[..32])
                    .map_err(|e| StorageError::Corruption(e.to_string()))?,
                index: u32::from_le_bytes(
                    raw[32..]
                        .try_into()
                        .map_err(|_| StorageError::Corruption("tx index width".into()))?,
                ),
            })),
            Some(_) => Err(StorageError::Corruption("tx location width".into())),
            None => Ok(None),
        }
    }

    /// Transaction hashes of every log emitted by `contract` with the given
    /// leading topic.
    pub fn logs_by_contract_topic(
        &self,
        contract: &basalt_types::Address,
        topic0: &Hash256,
    ) -> Result<Vec<Hash256>, StorageError> {
        let mut prefix = Vec::with_capacity(52);
        prefix.extend_from_slice(&contract.0);
        prefix.extend_from_slice(&topic0.0);
        self.db
            .scan_prefix(CF_LOGS, &prefix)?
            .into_iter()
            .map(|(_, value)| {
                Hash256::try_from(value.as_slice())
                    .map_err(|e| StorageError::Corruption(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_types::{Address, Log, U256};

    fn receipt_with_log(tx_index: u32) -> Receipt {
        Receipt {
            success: true,
            gas_used: 21_000,
            cumulative_gas_used: 21_000,
            effective_gas_price: U256::one(),
            post_state_root: Hash256::ZERO,
            logs: vec![Log {
                address: Address([0xcc; 20]),
                topics: vec![Hash256([0xdd; 32])],
                data: vec![1],
                index: 0,
            }],
            block_hash: Hash256([1; 32]),
            tx_index,
        }
    }

    #[test]
    fn receipts_and_locations_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let store = ReceiptStore::new(db.clone());

        let tx_hash = Hash256([7; 32]);
        let receipt = receipt_with_log(2);
        let mut batch = db.batch();
        store
            .stage_block_receipts(&mut batch, Hash256([1; 32]), 5, &[tx_hash], &[receipt.clone()])
            .unwrap();
        batch.commit().unwrap();

        assert_eq!(store.receipt(&tx_hash).unwrap(), Some(receipt));
        assert_eq!(
            store.tx_location(&tx_hash).unwrap(),
            Some(TxLocation {
                block_hash: Hash256([1; 32]),
                index: 2
            })
        );
        assert_eq!(store.receipt(&Hash256([8; 32])).unwrap(), None);
    }

    #[test]
    fn log_index_selects_by_contract_and_topic() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let store = ReceiptStore::new(db.clone());

        let tx_hash = Hash256([7; 32]);
        let mut batch = db.batch();
        store
            .stage_block_receipts(
                &mut batch,
                Hash256([1; 32]),
                5,
                &[tx_hash],
                &[receipt_with_log(0)],
            )
            .unwrap();
        batch.commit().unwrap();

        let hits = store
            .logs_by_contract_topic(&Address([0xcc; 20]), &Hash256([0xdd; 32]))
            .unwrap();
        assert_eq!(hits, vec![tx_hash]);
        assert!(store
            .logs_by_contract_topic(&Address([0xcc; 20]), &Hash256([0x01; 32]))
            .unwrap()
            .is_empty());
    }
}
