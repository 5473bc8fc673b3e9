//! Domain-separated signing payloads.
//!
//! Every consensus signature covers the chain id, so a signature produced
//! on one network can never verify on another. The payload layout is fixed
//! and little-endian throughout:
//!
//! `chain_id (4B) || phase_tag (1B) || view (8B) || block_number (8B) ||
//!  block_hash (32B)`
//!
//! View changes use the reserved tag `0xFF` and omit the block fields:
//! `chain_id (4B) || 0xFF || proposed_view (8B)`.

use basalt_types::{CodecError, Hash256};

/// Consensus phases, in protocol order. The tag value is the byte signed
/// into the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Prepare,
    PreCommit,
    Commit,
}

impl Phase {
    pub fn tag(self) -> u8 {
        match self {
            Self::Prepare => 0x01,
            Self::PreCommit => 0x02,
            Self::Commit => 0x03,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        Ok(match tag {
            0x01 => Self::Prepare,
            0x02 => Self::PreCommit,
            0x03 => Self::Commit,
            other => return Err(CodecError::InvalidValue(format!("phase tag {other}"))),
        })
    }

    /// The phase a quorum in this phase advances the round to.
    pub fn next(self) -> Option<Phase> {
        match self {
            Self::Prepare => Some(Self::PreCommit),
            Self::PreCommit => Some(Self::Commit),
            Self::Commit => None,
        }
    }
}

/// Reserved tag for view-change payloads.
pub const VIEW_CHANGE_TAG: u8 = 0xFF;

pub const CONSENSUS_PAYLOAD_LEN: usize = 4 + 1 + 8 + 8 + 32;
pub const VIEW_CHANGE_PAYLOAD_LEN: usize = 4 + 1 + 8;

/// The bytes signed for a proposal, vote or quorum certificate.
pub fn consensus_payload(
    chain_id: u32,
    phase: Phase,
    view: u64,
    block_number: u64,
    block_hash: &Hash256,
) -> [u8; CONSENSUS_PAYLOAD_LEN] {
    let mut out = [0u8; CONSENSUS_PAYLOAD_LEN];
    out[0..4].copy_from_slice(&chain_id.to_le_bytes());
    out[4] = phase.tag();
    out[5..13].copy_from_slice(&view.to_le_bytes());
    out[13..21].copy_from_slice(&block_number.to_le_bytes());
    out[21..].copy_from_slice(&block_hash.0);
    out
}

/// The bytes signed for a view-change message.
pub fn view_change_payload(chain_id: u32, proposed_view: u64) -> [u8; VIEW_CHANGE_PAYLOAD_LEN] {
    let mut out = [0u8; VIEW_CHANGE_PAYLOAD_LEN];
    out[0..4].copy_from_slice(&chain_id.to_le_bytes());
    out[4] = VIEW_CHANGE_TAG;
    out[5..].copy_from_slice(&proposed_view.to_le_bytes());
    out
}
