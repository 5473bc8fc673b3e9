//! Chain metadata: the tip pointer, the genesis hash, flat state writes and
//! per-block commit records.

use crate::db::{CommitBatch, Database, CF_METADATA, CF_STATE};
use basalt_types::{
    from_bytes_canonical, to_bytes_canonical, CommitRecord, Hash256, StorageError,
};
use std::sync::Arc;

const TIP_KEY: &[u8] = b"tip";
const GENESIS_KEY: &[u8] = b"genesis";
const STAKING_KEY: &[u8] = b"staking";
const COMMIT_PREFIX: u8 = b'c';

/// The persisted chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipRecord {
    pub number: u64,
    pub hash: Hash256,
    pub state_root: Hash256,
}

pub struct MetaStore {
    db: Arc<Database>,
}

impl MetaStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn stage_tip(
        &self,
        batch: &mut CommitBatch<'_>,
        tip: &TipRecord,
    ) -> Result<(), StorageError> {
        let mut raw = [0u8; 72];
        raw[..8].copy_from_slice(&tip.number.to_le_bytes());
        raw[8..40].copy_from_slice(&tip.hash.0);
        raw[40..].copy_from_slice(&tip.state_root.0);
        batch.put(CF_METADATA, TIP_KEY, &raw)
    }

    pub fn tip(&self) -> Result<Option<TipRecord>, StorageError> {
        match self.db.get(CF_METADATA, TIP_KEY)? {
            Some(raw) if raw.len() == 72 => Ok(Some(TipRecord {
                number: u64::from_le_bytes(
                    raw[..8]
                        .try_into()
                        .map_err(|_| StorageError::Corruption("tip number width".into()))?,
                ),
                hash: Hash256::try_from(&raw[8..40])
                    .map_err(|e| StorageError::Corruption(e.to_string()))?,
                state_root: Hash256::try_from(&raw[40..])
                    .map_err(|e| StorageError::Corruption(e.to_string()))?,
            })),
            Some(_) => Err(StorageError::Corruption("tip record width".into())),
            None => Ok(None),
        }
    }

    pub fn set_genesis_hash(&self, hash: Hash256) -> Result<(), StorageError> {
        self.db.put(CF_METADATA, GENESIS_KEY, &hash.0)
    }

    pub fn genesis_hash(&self) -> Result<Option<Hash256>, StorageError> {
        match self.db.get(CF_METADATA, GENESIS_KEY)? {
            Some(raw) => Hash256::try_from(raw.as_slice())
                .map(Some)
                .map_err(|e| StorageError::Corruption(e.to_string())),
            None => Ok(None),
        }
    }

    /// Stages one block's commit bitmap, keyed by block number and stored
    /// together with the epoch whose validator indices it refers to.
    pub fn stage_commit_record(
        &self,
        batch: &mut CommitBatch<'_>,
        record: &CommitRecord,
    ) -> Result<(), StorageError> {
        let mut key = [0u8; 9];
        key[0] = COMMIT_PREFIX;
        key[1..].copy_from_slice(&record.block_number.to_le_bytes());
        batch.put(CF_METADATA, &key, &to_bytes_canonical(record))
    }

    pub fn commit_record(&self, block_number: u64) -> Result<Option<CommitRecord>, StorageError> {
        let mut key = [0u8; 9];
        key[0] = COMMIT_PREFIX;
        key[1..].copy_from_slice(&block_number.to_le_bytes());
        match self.db.get(CF_METADATA, &key)? {
            Some(raw) => from_bytes_canonical::<CommitRecord>(&raw)
                .map(Some)
                .map_err(|e| StorageError::Corruption(e.to_string())),
            None => Ok(None),
        }
    }

    /// Commit records for `[from, to]`, skipping blocks without one.
    pub fn commit_records(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<CommitRecord>, StorageError> {
        let mut out = Vec::new();
        for number in from..=to {
            if let Some(record) = self.commit_record(number)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Stages the canonical staking-registry snapshot for this block.
    pub fn stage_staking_snapshot(
        &self,
        batch: &mut CommitBatch<'_>,
        snapshot: &[u8],
    ) -> Result<(), StorageError> {
        batch.put(CF_METADATA, STAKING_KEY, snapshot)
    }

    pub fn staking_snapshot(&self) -> Result<Option<Vec<u8>>, StorageError> {
        self.db.get(CF_METADATA, STAKING_KEY)
    }

    /// Stages flat-state writes drained from the state database.
    pub fn stage_flat_writes(
        &self,
        batch: &mut CommitBatch<'_>,
        writes: &[(Vec<u8>, Option<Vec<u8>>)],
    ) -> Result<(), StorageError> {
        for (key, value) in writes {
            match value {
                Some(v) => batch.put(CF_STATE, key, v)?,
                None => batch.delete(CF_STATE, key)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let meta = MetaStore::new(db.clone());
        assert_eq!(meta.tip().unwrap(), None);

        let tip = TipRecord {
            number: 9,
            hash: Hash256([1; 32]),
            state_root: Hash256([2; 32]),
        };
        let mut batch = db.batch();
        meta.stage_tip(&mut batch, &tip).unwrap();
        batch.commit().unwrap();
        assert_eq!(meta.tip().unwrap(), Some(tip));
    }

    #[test]
    fn commit_records_over_a_range() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let meta = MetaStore::new(db.clone());

        let mut batch = db.batch();
        for number in 10..13 {
            meta.stage_commit_record(
                &mut batch,
                &CommitRecord {
                    epoch: 1,
                    block_number: number,
                    bitmap: 0b1011,
                },
            )
            .unwrap();
        }
        batch.commit().unwrap();

        let records = meta.commit_records(10, 14).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.epoch == 1 && r.bitmap == 0b1011));
    }
}
