//! Three-phase Byzantine-fault-tolerant consensus with leader-collected
//! votes and BLS-aggregated quorum certificates.

pub mod engine;
pub mod evidence;
pub mod leader;
pub mod messages;
pub mod outbound;
pub mod payload;

pub use engine::{Action, BftEngine, RoundPhase};
pub use evidence::{EquivocationEvidence, EquivocationTracker};
pub use leader::{is_leader, leader_for};
pub use messages::{ConsensusMessage, Proposal, QuorumCertificate, ViewChange, Vote};
pub use outbound::ConsensusOutbound;
pub use payload::{consensus_payload, view_change_payload, Phase, VIEW_CHANGE_TAG};
