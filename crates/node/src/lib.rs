//! The Basalt node: coordination of consensus, execution, state, storage
//! and networking, plus the `basalt` binary.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod genesis;
pub mod service;
pub mod sync;

pub use config::{ConfigError, NodeConfig};
pub use coordinator::{Coordinator, Outbound};
pub use error::NodeError;
pub use genesis::{build_genesis, GenesisState};
pub use service::{now_ms, NodeService, PeerRegistry};
pub use sync::{SyncGuard, SyncRequestSpec, SYNC_TIMEOUT};
