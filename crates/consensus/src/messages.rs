//! Consensus wire messages.

use crate::payload::Phase;
use basalt_types::{
    Address, Block, BlsSignature, CodecError, Decode, Encode, Hash256, Reader, Writer,
};

impl Encode for Phase {
    fn encode(&self, w: &mut Writer) {
        w.put_u8(self.tag());
    }
}

impl Decode for Phase {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Phase::from_tag(r.read_u8()?)
    }
}

/// A leader's block proposal; the signature covers the PREPARE payload for
/// `(view, block_number, block_hash)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub view: u64,
    pub block_number: u64,
    pub block_hash: Hash256,
    pub block: Block,
    pub proposer: Address,
    pub signature: BlsSignature,
}

impl Encode for Proposal {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.view);
        w.put_u64(self.block_number);
        self.block_hash.encode(w);
        self.block.encode(w);
        self.proposer.encode(w);
        self.signature.encode(w);
    }
}

impl Decode for Proposal {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            view: r.read_u64()?,
            block_number: r.read_u64()?,
            block_hash: Hash256::decode(r)?,
            block: Block::decode(r)?,
            proposer: Address::decode(r)?,
            signature: BlsSignature::decode(r)?,
        })
    }
}

/// An individual vote, sent only to the round's leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub phase: Phase,
    pub view: u64,
    pub block_number: u64,
    pub block_hash: Hash256,
    pub voter: Address,
    pub signature: BlsSignature,
}

impl Encode for Vote {
    fn encode(&self, w: &mut Writer) {
        self.phase.encode(w);
        w.put_u64(self.view);
        w.put_u64(self.block_number);
        self.block_hash.encode(w);
        self.voter.encode(w);
        self.signature.encode(w);
    }
}

impl Decode for Vote {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            phase: Phase::decode(r)?,
            view: r.read_u64()?,
            block_number: r.read_u64()?,
            block_hash: Hash256::decode(r)?,
            voter: Address::decode(r)?,
            signature: BlsSignature::decode(r)?,
        })
    }
}

/// An aggregate of quorum-many votes for one `(phase, view, block_number,
/// block_hash)`, broadcast by the leader. Bit `i` of the bitmap selects the
/// validator at index `i` of the epoch's set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumCertificate {
    pub phase: Phase,
    pub view: u64,
    pub block_number: u64,
    pub block_hash: Hash256,
    pub signers_bitmap: u64,
    pub aggregate_signature: BlsSignature,
}

impl Encode for QuorumCertificate {
    fn encode(&self, w: &mut Writer) {
        self.phase.encode(w);
        w.put_u64(self.view);
        w.put_u64(self.block_number);
        self.block_hash.encode(w);
        w.put_u64(self.signers_bitmap);
        self.aggregate_signature.encode(w);
    }
}

impl Decode for QuorumCertificate {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            phase: Phase::decode(r)?,
            view: r.read_u64()?,
            block_number: r.read_u64()?,
            block_hash: Hash256::decode(r)?,
            signers_bitmap: r.read_u64()?,
            aggregate_signature: BlsSignature::decode(r)?,
        })
    }
}

/// A vote to abandon the current view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewChange {
    pub proposed_view: u64,
    pub voter: Address,
    pub signature: BlsSignature,
}

impl Encode for ViewChange {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.proposed_view);
        self.voter.encode(w);
        self.signature.encode(w);
    }
}

impl Decode for ViewChange {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            proposed_view: r.read_u64()?,
            voter: Address::decode(r)?,
            signature: BlsSignature::decode(r)?,
        })
    }
}

/// Envelope for the consensus message family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    Vote(Vote),
    Qc(QuorumCertificate),
    ViewChange(ViewChange),
}

const TAG_PROPOSAL: u8 = 0x01;
const TAG_VOTE: u8 = 0x02;
const TAG_QC: u8 = 0x03;
const TAG_VIEW_CHANGE: u8 = 0x04;

impl Encode for ConsensusMessage {
    fn encode(&self, w: &mut Writer) {
        match self {
            Self::Proposal(m) => {
                w.put_u8(TAG_PROPOSAL);
                m.encode(w);
            }
            Self::Vote(m) => {
                w.put_u8(TAG_VOTE);
                m.encode(w);
            }
            Self::Qc(m) => {
                w.put_u8(TAG_QC);
                m.encode(w);
            }
            Self::ViewChange(m) => {
                w.put_u8(TAG_VIEW_CHANGE);
                m.encode(w);
            }
        }
    }
}

impl Decode for ConsensusMessage {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(match r.read_u8()? {
            TAG_PROPOSAL => Self::Proposal(Proposal::decode(r)?),
            TAG_VOTE => Self::Vote(Vote::decode(r)?),
            TAG_QC => Self::Qc(QuorumCertificate::decode(r)?),
            TAG_VIEW_CHANGE => Self::ViewChange(ViewChange::decode(r)?),
            other => {
                return Err(CodecError::InvalidValue(format!(
                    "consensus message tag {other}"
                )))
            }
        })
    }
}
