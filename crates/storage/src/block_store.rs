//! Block persistence: blocks by hash, a number → hash index, and a
//! fixed-size LRU window in front so recent-history lookups skip the disk.

use crate::db::{CommitBatch, Database, CF_BLOCKS, CF_BLOCK_INDEX};
use basalt_types::{from_bytes_canonical, to_bytes_canonical, Block, Hash256, StorageError};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

const RECENT_WINDOW: usize = 256;

pub struct BlockStore {
    db: Arc<Database>,
    recent: Mutex<LruCache<u64, Arc<Block>>>,
}

impl BlockStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            recent: Mutex::new(LruCache::new(
                NonZeroUsize::new(RECENT_WINDOW).expect("window is non-zero"),
            )),
        }
    }

    /// Stages a block into an open batch and primes the recent window.
    pub fn stage_block(
        &self,
        batch: &mut CommitBatch<'_>,
        block_hash: Hash256,
        block: &Block,
    ) -> Result<(), StorageError> {
        batch.put(CF_BLOCKS, &block_hash.0, &to_bytes_canonical(block))?;
        batch.put(
            CF_BLOCK_INDEX,
            &block.header.number.to_le_bytes(),
            &block_hash.0,
        )?;
        self.recent
            .lock()
            .put(block.header.number, Arc::new(block.clone()));
        Ok(())
    }

    pub fn hash_by_number(&self, number: u64) -> Result<Option<Hash256>, StorageError> {
        match self.db.get(CF_BLOCK_INDEX, &number.to_le_bytes())? {
            Some(raw) => Hash256::try_from(raw.as_slice())
                .map(Some)
                .map_err(|e| StorageError::Corruption(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn by_hash(&self, hash: &Hash256) -> Result<Option<Block>, StorageError> {
        match self.db.get(CF_BLOCKS, &hash.0)? {
            Some(raw) => from_bytes_canonical::<Block>(&raw)
                .map(Some)
                .map_err(|e| StorageError::Corruption(e.to_string())),
            None => Ok(None),
        }
    }

    /// Recent window first, then the persistent index.
    pub fn by_number(&self, number: u64) -> Result<Option<Arc<Block>>, StorageError> {
        if let Some(block) = self.recent.lock().get(&number) {
            return Ok(Some(block.clone()));
        }
        let Some(hash) = self.hash_by_number(number)? else {
            return Ok(None);
        };
        let Some(block) = self.by_hash(&hash)? else {
            return Err(StorageError::Corruption(format!(
                "block index points at missing block {hash}"
            )));
        };
        let block = Arc::new(block);
        self.recent.lock().put(number, block.clone());
        Ok(Some(block))
    }

    /// Drops blocks re-orged away during a sync rollback from the recent
    /// window and the index. Block bodies stay in `blocks` (hash-addressed,
    /// harmless) until pruning.
    pub fn unindex_from(&self, batch: &mut CommitBatch<'_>, from_number: u64, to_number: u64) {
        let mut recent = self.recent.lock();
        for number in from_number..=to_number {
            recent.pop(&number);
            let _ = batch.delete(CF_BLOCK_INDEX, &number.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_types::{Address, BlockHeader, U256};

    fn block_at(number: u64) -> (Hash256, Block) {
        let block = Block {
            header: BlockHeader {
                number,
                parent_hash: Hash256::ZERO,
                chain_id: 1,
                timestamp_ms: number * 1_000,
                state_root: Hash256::ZERO,
                tx_root: Hash256::ZERO,
                receipts_root: Hash256::ZERO,
                gas_used: 0,
                gas_limit: 30_000_000,
                base_fee: U256::one(),
                proposer: Address::ZERO,
                extra_data: vec![],
                protocol_version: 1,
            },
            transactions: vec![],
            commit_bitmap: 0,
        };
        (Hash256([number as u8; 32]), block)
    }

    #[test]
    fn store_and_fetch_by_hash_and_number() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let store = BlockStore::new(db.clone());

        let (hash, block) = block_at(1);
        let mut batch = db.batch();
        store.stage_block(&mut batch, hash, &block).unwrap();
        batch.commit().unwrap();

        assert_eq!(store.by_hash(&hash).unwrap(), Some(block.clone()));
        assert_eq!(store.hash_by_number(1).unwrap(), Some(hash));
        assert_eq!(store.by_number(1).unwrap().unwrap().header.number, 1);
    }

    #[test]
    fn by_number_falls_through_cache_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        {
            let store = BlockStore::new(db.clone());
            let (hash, block) = block_at(7);
            let mut batch = db.batch();
            store.stage_block(&mut batch, hash, &block).unwrap();
            batch.commit().unwrap();
        }

        // A fresh store has a cold window; the lookup must hit disk.
        let store = BlockStore::new(db);
        assert_eq!(store.by_number(7).unwrap().unwrap().header.number, 7);
    }

    #[test]
    fn unindex_removes_number_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let store = BlockStore::new(db.clone());

        let (hash, block) = block_at(3);
        let mut batch = db.batch();
        store.stage_block(&mut batch, hash, &block).unwrap();
        batch.commit().unwrap();

        let mut batch = db.batch();
        store.unindex_from(&mut batch, 3, 3);
        batch.commit().unwrap();
        assert_eq!(store.by_number(3).unwrap(), None);
        // The body itself remains addressable by hash.
        assert!(store.by_hash(&hash).unwrap().is_some());
    }
}
