//! Flat key-value cache in front of the trie.
//!
//! Writes go through the cache so repeated reads of hot keys skip the trie
//! walk; deletions leave explicit tombstones so a deleted key never falls
//! through to a stale trie value. The cache also records which keys changed
//! since the last drain, which is what the persistence batch writes into the
//! flat `state` column family.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CacheEntry {
    Value(Vec<u8>),
    Tombstone,
}

/// Result of a cache probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheHit {
    /// The key is cached with this value.
    Value(Vec<u8>),
    /// The key is known deleted; do not consult the trie.
    Deleted,
    /// The cache knows nothing about the key.
    Miss,
}

const DEFAULT_WARN_THRESHOLD: usize = 500_000;

pub struct FlatCache {
    entries: RwLock<HashMap<Vec<u8>, CacheEntry>>,
    dirty: RwLock<HashMap<Vec<u8>, Option<Vec<u8>>>>,
    warn_threshold: usize,
}

impl Default for FlatCache {
    fn default() -> Self {
        Self::with_warn_threshold(DEFAULT_WARN_THRESHOLD)
    }
}

impl FlatCache {
    pub fn with_warn_threshold(warn_threshold: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            dirty: RwLock::new(HashMap::new()),
            warn_threshold,
        }
    }

    pub fn probe(&self, key: &[u8]) -> CacheHit {
        match self.entries.read().get(key) {
            Some(CacheEntry::Value(v)) => CacheHit::Value(v.clone()),
            Some(CacheEntry::Tombstone) => CacheHit::Deleted,
            None => CacheHit::Miss,
        }
    }

    /// Caches a value read from the trie without marking it dirty.
    pub fn fill(&self, key: Vec<u8>, value: Vec<u8>) {
        self.insert_entry(key, CacheEntry::Value(value));
    }

    /// Records a write.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.dirty
            .write()
            .insert(key.clone(), Some(value.clone()));
        self.insert_entry(key, CacheEntry::Value(value));
    }

    /// Records a deletion tombstone.
    pub fn delete(&self, key: Vec<u8>) {
        self.dirty.write().insert(key.clone(), None);
        self.insert_entry(key, CacheEntry::Tombstone);
    }

    /// Tombstones every cached key with the given prefix; used when an
    /// account is deleted and its storage must stop resolving.
    pub fn delete_prefix(&self, prefix: &[u8]) {
        let keys: Vec<Vec<u8>> = self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in keys {
            self.delete(key);
        }
    }

    fn insert_entry(&self, key: Vec<u8>, entry: CacheEntry) {
        let mut entries = self.entries.write();
        entries.insert(key, entry);
        if entries.len() == self.warn_threshold {
            warn!(
                target: "state",
                "flat state cache reached {} entries; consider pruning",
                self.warn_threshold
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drains the dirty set for the persistence batch. `None` values are
    /// deletions.
    pub fn take_writes(&self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        self.dirty.write().drain().collect()
    }

    /// Deep copy for forks: no byte buffer is shared with the original.
    pub fn deep_clone(&self) -> Self {
        Self {
            entries: RwLock::new(self.entries.read().clone()),
            dirty: RwLock::new(self.dirty.read().clone()),
            warn_threshold: self.warn_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstones_shadow_the_trie() {
        let cache = FlatCache::default();
        cache.put(b"k".to_vec(), vec![1]);
        assert_eq!(cache.probe(b"k"), CacheHit::Value(vec![1]));
        cache.delete(b"k".to_vec());
        assert_eq!(cache.probe(b"k"), CacheHit::Deleted);
        assert_eq!(cache.probe(b"other"), CacheHit::Miss);
    }

    #[test]
    fn fills_are_not_dirty() {
        let cache = FlatCache::default();
        cache.fill(b"read".to_vec(), vec![1]);
        cache.put(b"written".to_vec(), vec![2]);
        let mut writes = cache.take_writes();
        writes.sort();
        assert_eq!(writes, vec![(b"written".to_vec(), Some(vec![2]))]);
        // Dirty set drained; entries remain cached.
        assert!(cache.take_writes().is_empty());
        assert_eq!(cache.probe(b"read"), CacheHit::Value(vec![1]));
    }

    #[test]
    fn deep_clone_shares_no_buffers() {
        let cache = FlatCache::default();
        cache.put(b"k".to_vec(), vec![1, 2, 3]);
        let clone = cache.deep_clone();
        clone.put(b"k".to_vec(), vec![9]);
        assert_eq!(cache.probe(b"k"), CacheHit::Value(vec![1, 2, 3]));
        assert_eq!(clone.probe(b"k"), CacheHit::Value(vec![9]));
    }

    #[test]
    fn prefix_deletion_tombstones_every_key() {
        let cache = FlatCache::default();
        cache.put(b"aa1".to_vec(), vec![1]);
        cache.put(b"aa2".to_vec(), vec![2]);
        cache.put(b"bb1".to_vec(), vec![3]);
        cache.delete_prefix(b"aa");
        assert_eq!(cache.probe(b"aa1"), CacheHit::Deleted);
        assert_eq!(cache.probe(b"aa2"), CacheHit::Deleted);
        assert_eq!(cache.probe(b"bb1"), CacheHit::Value(vec![3]));
    }
}
