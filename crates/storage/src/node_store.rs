//! The persistent trie-node store backing the canonical state database.

use crate::db::{Database, CF_TRIE_NODES};
use basalt_state::{mark_reachable, NodeStore};
use basalt_types::{Hash256, StateError};
use std::sync::Arc;
use tracing::info;

pub struct RocksNodeStore {
    db: Arc<Database>,
}

impl RocksNodeStore {
    pub fn new(db: Arc<Database>) -> Arc<Self> {
        Arc::new(Self { db })
    }
}

impl NodeStore for RocksNodeStore {
    fn get_node(&self, hash: &Hash256) -> Result<Option<Vec<u8>>, StateError> {
        self.db
            .get(CF_TRIE_NODES, &hash.0)
            .map_err(|e| StateError::Backend(e.to_string()))
    }

    fn put_node(&self, hash: Hash256, bytes: Vec<u8>) -> Result<(), StateError> {
        self.db
            .put(CF_TRIE_NODES, &hash.0, &bytes)
            .map_err(|e| StateError::Backend(e.to_string()))
    }

    /// Mark-and-sweep from the given roots. Intended for maintenance
    /// windows; the sweep scans the whole column family.
    fn retain_reachable(&self, roots: &[Hash256]) -> Result<usize, StateError> {
        let live = mark_reachable(self, roots)?;
        let cf = self
            .db
            .raw()
            .cf_handle(CF_TRIE_NODES)
            .ok_or_else(|| StateError::Backend("missing trie_nodes column family".into()))?;

        let mut swept = 0usize;
        for item in self.db.raw().iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StateError::Backend(e.to_string()))?;
            let Ok(hash) = Hash256::try_from(key.as_ref()) else {
                continue;
            };
            if !live.contains_key(&hash) {
                self.db
                    .raw()
                    .delete_cf(cf, &key)
                    .map_err(|e| StateError::Backend(e.to_string()))?;
                swept += 1;
            }
        }
        info!(target: "storage", live = live.len(), swept, "trie node sweep complete");
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_state::{StateAccess, TrieStateDb};
    use basalt_types::{AccountState, Address, U256};

    #[test]
    fn state_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let addr = Address([1; 20]);
        let root;
        {
            let db = Database::open(dir.path()).unwrap();
            let store = RocksNodeStore::new(db);
            let mut state = TrieStateDb::open(store.clone(), Hash256::ZERO);
            state
                .set_account(
                    addr,
                    AccountState {
                        balance: U256::from(9u64),
                        ..Default::default()
                    },
                )
                .unwrap();
            root = state.compute_state_root().unwrap();
            for (hash, bytes) in state.take_trie_delta() {
                store.put_node(hash, bytes).unwrap();
            }
        }

        let db = Database::open(dir.path()).unwrap();
        let store = RocksNodeStore::new(db);
        let state = TrieStateDb::open(store, root);
        let account = state.get_account(&addr).unwrap().unwrap();
        assert_eq!(account.balance, U256::from(9u64));
    }

    #[test]
    fn sweep_keeps_reachable_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let store = RocksNodeStore::new(db);

        let mut state = TrieStateDb::open(store.clone(), Hash256::ZERO);
        state
            .set_account(Address([1; 20]), AccountState::default())
            .unwrap();
        let old_root = state.compute_state_root().unwrap();
        state
            .set_account(Address([2; 20]), AccountState::default())
            .unwrap();
        let new_root = state.compute_state_root().unwrap();
        for (hash, bytes) in state.take_trie_delta() {
            store.put_node(hash, bytes).unwrap();
        }

        // Retain only the new root; the old root's unique nodes go away.
        store.retain_reachable(&[new_root]).unwrap();
        let reopened = TrieStateDb::open(store.clone(), new_root);
        assert!(reopened.get_account(&Address([1; 20])).is_ok());
        assert!(reopened.get_account(&Address([2; 20])).unwrap().is_some());
        let _ = old_root;
    }
}
