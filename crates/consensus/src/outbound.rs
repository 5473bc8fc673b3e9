//! The consensus → transport seam.

use crate::messages::{Proposal, QuorumCertificate, ViewChange, Vote};
use async_trait::async_trait;
use basalt_types::{NetworkError, PeerId};

/// How consensus messages leave the engine. The node's peer registry
/// implements this over the encrypted transport and every engine wire
/// action is delivered through it; tests drive the engine directly and
/// route actions by hand.
#[async_trait]
pub trait ConsensusOutbound: Send + Sync {
    async fn broadcast_proposal(&self, proposal: &Proposal) -> Result<(), NetworkError>;
    async fn send_vote_to_leader(&self, vote: &Vote, leader: &PeerId) -> Result<(), NetworkError>;
    async fn broadcast_qc(&self, qc: &QuorumCertificate) -> Result<(), NetworkError>;
    async fn broadcast_view_change(&self, vc: &ViewChange) -> Result<(), NetworkError>;
}
