//! Persistent storage for the Basalt node: a RocksDB database with one
//! column family per concern, typed stores on top, and explicit atomic
//! write batches.

#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

pub mod block_store;
pub mod db;
pub mod meta;
pub mod node_store;
pub mod receipt_store;

pub use block_store::BlockStore;
pub use db::{
    CommitBatch, Database, ALL_CFS, CF_BLOCKS, CF_BLOCK_INDEX, CF_LOGS, CF_METADATA, CF_RECEIPTS,
    CF_STATE, CF_TRIE_NODES, CF_TX_INDEX,
};
pub use meta::{MetaStore, TipRecord};
pub use node_store::RocksNodeStore;
pub use receipt_store::{ReceiptStore, TxLocation};
