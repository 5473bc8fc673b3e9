//! Merkle Patricia Trie state engine with a flat write-through cache and
//! fork-and-swap semantics for speculative execution.

#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

pub mod flat;
pub mod memdb;
pub mod statedb;
pub mod store;
pub mod trie;

pub use memdb::InMemoryStateDb;
pub use statedb::{StateAccess, StateHandle, TrieStateDb};
pub use store::{mark_reachable, MemoryNodeStore, NodeStore, OverlayNodeStore};
pub use trie::{verify_proof, Trie};
