//! The state database: account and storage access over the world trie,
//! with fork-and-swap semantics for speculative execution.
//!
//! Two kinds exist. [`TrieStateDb`] is the production database; the
//! in-memory variant in [`crate::memdb`] exists for tests and folds storage
//! into account records through the same code path, so the two always agree
//! on roots.

use crate::flat::{CacheHit, FlatCache};
use crate::store::{NodeStore, OverlayNodeStore};
use crate::trie::Trie;
use basalt_types::keys::{account_key, storage_key, storage_prefix};
use basalt_types::{
    from_bytes_canonical, to_bytes_canonical, AccountState, Address, Hash256, StateError,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Read/write access to accounts and contract storage.
pub trait StateAccess: Send {
    fn get_account(&self, address: &Address) -> Result<Option<AccountState>, StateError>;
    fn set_account(&mut self, address: Address, account: AccountState) -> Result<(), StateError>;
    fn delete_account(&mut self, address: Address) -> Result<(), StateError>;
    fn get_storage(&self, address: &Address, slot: &Hash256)
        -> Result<Option<Vec<u8>>, StateError>;
    /// An empty value deletes the slot.
    fn set_storage(
        &mut self,
        address: Address,
        slot: Hash256,
        value: Vec<u8>,
    ) -> Result<(), StateError>;
    /// Flushes pending storage writes into per-account storage roots and
    /// returns the world state root.
    fn compute_state_root(&mut self) -> Result<Hash256, StateError>;
}

/// The trie-backed state database.
pub struct TrieStateDb {
    /// The persistent store every overlay eventually drains into.
    base: Arc<dyn NodeStore>,
    /// This database's private write layer.
    nodes: Arc<OverlayNodeStore>,
    world: Trie,
    cache: FlatCache,
    /// Storage writes not yet folded into account storage roots.
    /// `None` means delete the slot.
    pending_storage: HashMap<Address, BTreeMap<Hash256, Option<Vec<u8>>>>,
}

impl TrieStateDb {
    /// Opens the database at a known world root on top of a persistent
    /// node store.
    pub fn open(base: Arc<dyn NodeStore>, root: Hash256) -> Self {
        let nodes = OverlayNodeStore::wrap(base.clone());
        let world = Trie::new(nodes.clone(), root);
        Self {
            base,
            nodes,
            world,
            cache: FlatCache::default(),
            pending_storage: HashMap::new(),
        }
    }

    pub fn root(&self) -> Hash256 {
        self.world.root()
    }

    /// True when storage writes have not been folded yet; forking in this
    /// state is refused.
    pub fn has_pending_storage(&self) -> bool {
        !self.pending_storage.is_empty()
    }

    /// Produces an isolated copy layered over this database's nodes.
    /// Cached byte buffers are deep-copied; mutations on either side stay
    /// invisible to the other until an explicit swap.
    ///
    /// Pending storage MUST be flushed first (`compute_state_root`); a fork
    /// of half-folded state would see torn storage roots.
    pub fn fork(&self) -> Result<TrieStateDb, StateError> {
        if self.has_pending_storage() {
            return Err(StateError::DirtyFork);
        }
        let nodes = OverlayNodeStore::wrap(self.nodes.clone() as Arc<dyn NodeStore>);
        Ok(TrieStateDb {
            base: self.base.clone(),
            nodes: nodes.clone(),
            world: Trie::new(nodes, self.world.root()),
            cache: self.cache.deep_clone(),
            pending_storage: HashMap::new(),
        })
    }

    /// Drains the nodes written by this database's layer for persistence.
    pub fn take_trie_delta(&self) -> Vec<(Hash256, Vec<u8>)> {
        self.nodes.drain()
    }

    /// Drains the flat-state writes (key, Some(value) | None) since the
    /// last drain.
    pub fn take_flat_writes(&self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        self.cache.take_writes()
    }

    /// Re-anchors this database directly on the persistent base after its
    /// delta has been persisted, collapsing the overlay chain a swap left
    /// behind. The world root is preserved.
    pub fn rebase(&mut self) {
        debug_assert_eq!(self.nodes.overlay_len(), 0, "rebase before drain");
        let nodes = OverlayNodeStore::wrap(self.base.clone());
        self.world = Trie::new(nodes.clone(), self.world.root());
        self.nodes = nodes;
    }

    /// Merkle proof for an account record.
    pub fn prove_account(&self, address: &Address) -> Result<Vec<Vec<u8>>, StateError> {
        self.world.prove(&account_key(address))
    }

    fn load_account_from_trie(
        &self,
        address: &Address,
    ) -> Result<Option<AccountState>, StateError> {
        match self.world.get(&account_key(address))? {
            Some(bytes) => from_bytes_canonical::<AccountState>(&bytes)
                .map(Some)
                .map_err(|e| StateError::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    fn storage_trie(&self, root: Hash256) -> Trie {
        Trie::new(self.nodes.clone() as Arc<dyn NodeStore>, root)
    }
}

impl StateAccess for TrieStateDb {
    fn get_account(&self, address: &Address) -> Result<Option<AccountState>, StateError> {
        let key = account_key(address);
        match self.cache.probe(&key) {
            CacheHit::Value(bytes) => from_bytes_canonical::<AccountState>(&bytes)
                .map(Some)
                .map_err(|e| StateError::Decode(e.to_string())),
            CacheHit::Deleted => Ok(None),
            CacheHit::Miss => {
                let account = self.load_account_from_trie(address)?;
                if let Some(ref acc) = account {
                    self.cache.fill(key.to_vec(), to_bytes_canonical(acc));
                }
                Ok(account)
            }
        }
    }

    fn set_account(&mut self, address: Address, account: AccountState) -> Result<(), StateError> {
        let bytes = to_bytes_canonical(&account);
        self.world.insert(&account_key(&address), bytes.clone())?;
        self.cache.put(account_key(&address).to_vec(), bytes);
        Ok(())
    }

    fn delete_account(&mut self, address: Address) -> Result<(), StateError> {
        self.world.delete(&account_key(&address))?;
        self.cache.delete(account_key(&address).to_vec());
        self.cache.delete_prefix(&storage_prefix(&address));
        self.pending_storage.remove(&address);
        Ok(())
    }

    fn get_storage(
        &self,
        address: &Address,
        slot: &Hash256,
    ) -> Result<Option<Vec<u8>>, StateError> {
        if let Some(writes) = self.pending_storage.get(address) {
            if let Some(value) = writes.get(slot) {
                return Ok(value.clone());
            }
        }
        let key = storage_key(address, slot);
        match self.cache.probe(&key) {
            CacheHit::Value(bytes) => Ok(Some(bytes)),
            CacheHit::Deleted => Ok(None),
            CacheHit::Miss => {
                let Some(account) = self.get_account(address)? else {
                    return Ok(None);
                };
                if account.storage_root.is_zero() {
                    return Ok(None);
                }
                let value = self.storage_trie(account.storage_root).get(&slot.0)?;
                if let Some(ref v) = value {
                    self.cache.fill(key.to_vec(), v.clone());
                }
                Ok(value)
            }
        }
    }

    fn set_storage(
        &mut self,
        address: Address,
        slot: Hash256,
        value: Vec<u8>,
    ) -> Result<(), StateError> {
        let key = storage_key(&address, &slot);
        if value.is_empty() {
            self.cache.delete(key.to_vec());
            self.pending_storage
                .entry(address)
                .or_default()
                .insert(slot, None);
        } else {
            self.cache.put(key.to_vec(), value.clone());
            self.pending_storage
                .entry(address)
                .or_default()
                .insert(slot, Some(value));
        }
        Ok(())
    }

    fn compute_state_root(&mut self) -> Result<Hash256, StateError> {
        let pending = std::mem::take(&mut self.pending_storage);
        for (address, writes) in pending {
            let mut account = self.get_account(&address)?.unwrap_or_default();
            let mut storage = self.storage_trie(account.storage_root);
            for (slot, value) in writes {
                match value {
                    Some(v) => storage.insert(&slot.0, v)?,
                    None => storage.delete(&slot.0)?,
                }
            }
            account.storage_root = storage.root();
            self.set_account(address, account)?;
        }
        Ok(self.world.root())
    }
}

/// The single reference cell owning canonical state.
///
/// `swap` atomically replaces the canonical database; readers that need a
/// consistent multi-read view must `fork` instead of reading repeatedly.
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<RwLock<TrieStateDb>>,
}

impl StateHandle {
    pub fn new(db: TrieStateDb) -> Self {
        Self {
            inner: Arc::new(RwLock::new(db)),
        }
    }

    pub fn fork(&self) -> Result<TrieStateDb, StateError> {
        self.inner.read().fork()
    }

    /// Atomically replaces the canonical state, returning the previous one.
    pub fn swap(&self, new: TrieStateDb) -> TrieStateDb {
        std::mem::replace(&mut *self.inner.write(), new)
    }

    pub fn read<R>(&self, f: impl FnOnce(&TrieStateDb) -> R) -> R {
        f(&self.inner.read())
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut TrieStateDb) -> R) -> R {
        f(&mut self.inner.write())
    }

    pub fn root(&self) -> Hash256 {
        self.inner.read().root()
    }
}
