//! Mempool, block builder and chain manager for the Basalt node.

pub mod builder;
pub mod manager;
pub mod mempool;

pub use builder::{build_block, ordered_root, receipts_root, transactions_root, BuiltBlock};
pub use manager::{ChainManager, Tip};
pub use mempool::{Mempool, MempoolConfig};
