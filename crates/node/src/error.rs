//! Node-level error type aggregating the subsystem errors.

use basalt_types::{
    BlockError, ConsensusError, MempoolError, NetworkError, StateError, StorageError, SyncError,
    TxError,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Network(NetworkError),
    #[error("invalid block: {0}")]
    InvalidBlock(String),
    #[error("database corruption: {0}")]
    Corrupt(String),
}
