//! The RocksDB database: one column family per concern, each tuned for its
//! access pattern, and explicit atomic write batches.

use basalt_types::StorageError;
use rocksdb::{
    BlockBasedOptions, ColumnFamily, ColumnFamilyDescriptor, Options, SliceTransform, WriteBatch,
    DB,
};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub const CF_TRIE_NODES: &str = "trie_nodes";
pub const CF_STATE: &str = "state";
pub const CF_BLOCKS: &str = "blocks";
pub const CF_BLOCK_INDEX: &str = "block_index";
pub const CF_RECEIPTS: &str = "receipts";
pub const CF_TX_INDEX: &str = "tx_index";
pub const CF_LOGS: &str = "logs";
pub const CF_METADATA: &str = "metadata";

pub const ALL_CFS: [&str; 8] = [
    CF_TRIE_NODES,
    CF_STATE,
    CF_BLOCKS,
    CF_BLOCK_INDEX,
    CF_RECEIPTS,
    CF_TX_INDEX,
    CF_LOGS,
    CF_METADATA,
];

/// Options for hash-keyed column families: point lookups only, so a bloom
/// filter pays for itself on every miss.
fn point_lookup_options() -> Options {
    let mut block_opts = BlockBasedOptions::default();
    block_opts.set_bloom_filter(10.0, false);
    block_opts.set_whole_key_filtering(true);
    let mut opts = Options::default();
    opts.set_block_based_table_factory(&block_opts);
    opts
}

/// Options for range-scanned column families: a prefix extractor keyed to
/// the scan prefix length.
fn prefix_scan_options(prefix_len: usize) -> Options {
    let mut opts = Options::default();
    opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(prefix_len));
    let mut block_opts = BlockBasedOptions::default();
    block_opts.set_bloom_filter(10.0, true);
    opts.set_block_based_table_factory(&block_opts);
    opts
}

fn cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_TRIE_NODES, point_lookup_options()),
        // Flat state keys are `prefix byte || 20-byte address || ...`; scans
        // iterate one account's storage.
        ColumnFamilyDescriptor::new(CF_STATE, prefix_scan_options(21)),
        ColumnFamilyDescriptor::new(CF_BLOCKS, point_lookup_options()),
        ColumnFamilyDescriptor::new(CF_BLOCK_INDEX, Options::default()),
        ColumnFamilyDescriptor::new(CF_RECEIPTS, point_lookup_options()),
        ColumnFamilyDescriptor::new(CF_TX_INDEX, point_lookup_options()),
        // Log keys are `contract || topic0 || position`; scans select by
        // contract and event signature.
        ColumnFamilyDescriptor::new(CF_LOGS, prefix_scan_options(52)),
        ColumnFamilyDescriptor::new(CF_METADATA, Options::default()),
    ]
}

pub struct Database {
    inner: DB,
}

impl Database {
    pub fn open(path: &Path) -> Result<Arc<Self>, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let inner = DB::open_cf_descriptors(&opts, path, cf_descriptors())
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Arc::new(Self { inner }))
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily, StorageError> {
        self.inner
            .cf_handle(name)
            .ok_or(StorageError::MissingColumnFamily(name))
    }

    pub fn get(&self, cf: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner
            .get_cf(self.cf(cf)?, key)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    pub fn put(&self, cf: &'static str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.inner
            .put_cf(self.cf(cf)?, key, value)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    /// Iterates every `(key, value)` pair whose key starts with `prefix`.
    pub fn scan_prefix(
        &self,
        cf: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let cf = self.cf(cf)?;
        let mut out = Vec::new();
        for item in self.inner.prefix_iterator_cf(cf, prefix) {
            let (key, value) = item.map_err(|e| StorageError::Backend(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    /// Starts an atomic write batch. The batch MUST be committed explicitly;
    /// dropping it with staged writes logs a warning and discards them.
    pub fn batch(&self) -> CommitBatch<'_> {
        CommitBatch {
            db: self,
            batch: WriteBatch::default(),
            committed: false,
        }
    }

    pub(crate) fn raw(&self) -> &DB {
        &self.inner
    }
}

/// An atomic write scope over multiple column families.
pub struct CommitBatch<'a> {
    db: &'a Database,
    batch: WriteBatch,
    committed: bool,
}

impl CommitBatch<'_> {
    pub fn put(&mut self, cf: &'static str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let cf = self.db.cf(cf)?;
        self.batch.put_cf(cf, key, value);
        Ok(())
    }

    pub fn delete(&mut self, cf: &'static str, key: &[u8]) -> Result<(), StorageError> {
        let cf = self.db.cf(cf)?;
        self.batch.delete_cf(cf, key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Commits every staged write atomically.
    pub fn commit(mut self) -> Result<(), StorageError> {
        self.committed = true;
        let batch = std::mem::take(&mut self.batch);
        self.db
            .inner
            .write(batch)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

impl Drop for CommitBatch<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.batch.is_empty() {
            warn!(
                target: "storage",
                staged = self.batch.len(),
                "write batch dropped without commit; staged writes discarded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_all_column_families() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        for cf in ALL_CFS {
            db.put(cf, b"k", b"v").unwrap();
            assert_eq!(db.get(cf, b"k").unwrap(), Some(b"v".to_vec()));
        }
    }

    #[test]
    fn batch_commit_is_atomic_and_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        // Dropped uncommitted: nothing lands.
        {
            let mut batch = db.batch();
            batch.put(CF_METADATA, b"a", b"1").unwrap();
        }
        assert_eq!(db.get(CF_METADATA, b"a").unwrap(), None);

        let mut batch = db.batch();
        batch.put(CF_METADATA, b"a", b"1").unwrap();
        batch.put(CF_BLOCKS, b"b", b"2").unwrap();
        batch.commit().unwrap();
        assert_eq!(db.get(CF_METADATA, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(CF_BLOCKS, b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn prefix_scan_stops_at_prefix_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let mut prefix_a = vec![0u8; 21];
        prefix_a[0] = 0x02;
        let mut other = prefix_a.clone();
        other[20] = 1;

        let mut key1 = prefix_a.clone();
        key1.push(1);
        let mut key2 = prefix_a.clone();
        key2.push(2);
        let mut key3 = other.clone();
        key3.push(3);

        db.put(CF_STATE, &key1, b"1").unwrap();
        db.put(CF_STATE, &key2, b"2").unwrap();
        db.put(CF_STATE, &key3, b"3").unwrap();

        let hits = db.scan_prefix(CF_STATE, &prefix_a).unwrap();
        assert_eq!(hits.len(), 2);
    }
}
