//! The peer wire protocol.
//!
//! Every message starts with a type byte; every numeric field is validated
//! against its allowed range at parse time, before any allocation-sized
//! decision. The sender identity embedded in the envelope is compared by
//! the connection layer against the authenticated peer identity.

use basalt_consensus::ConsensusMessage;
use basalt_types::{
    Block, CodecError, Decode, Encode, Hash256, PeerId, Reader, Transaction, Writer,
};
use std::net::SocketAddr;

/// Maximum clock drift tolerated in either direction.
pub const MAX_TIMESTAMP_DRIFT_MS: u64 = 30_000;
/// Per-array caps, enforced before allocation.
pub const MAX_ANNOUNCED_TXS: usize = 256;
pub const MAX_REQUESTED_HASHES: usize = 256;
pub const MAX_SYNC_BLOCKS: usize = 128;
pub const MAX_FIND_NODE_PEERS: usize = 16;
pub const MAX_GOSSIP_IDS: usize = 512;

/// A peer's advertised contact point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr {
    pub peer_id: PeerId,
    pub addr: SocketAddr,
}

impl Encode for PeerAddr {
    fn encode(&self, w: &mut Writer) {
        self.peer_id.encode(w);
        match self.addr.ip() {
            std::net::IpAddr::V4(ip) => {
                w.put_u8(4);
                w.put_raw(&ip.octets());
            }
            std::net::IpAddr::V6(ip) => {
                w.put_u8(6);
                w.put_raw(&ip.octets());
            }
        }
        w.put_u16(self.addr.port());
    }
}

impl Decode for PeerAddr {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let peer_id = PeerId::decode(r)?;
        let ip = match r.read_u8()? {
            4 => std::net::IpAddr::from(r.read_array::<4>()?),
            6 => std::net::IpAddr::from(r.read_array::<16>()?),
            other => {
                return Err(CodecError::InvalidValue(format!(
                    "ip version tag {other}"
                )))
            }
        };
        let port = r.read_u16()?;
        Ok(Self {
            peer_id,
            addr: SocketAddr::new(ip, port),
        })
    }
}

/// The post-handshake message families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Consensus(ConsensusMessage),
    /// Newly admitted transactions, pushed to peers.
    TxAnnounce(Vec<Transaction>),
    /// Pull request for full transactions by hash.
    TxPull(Vec<Hash256>),
    BlockRequestByHash(Hash256),
    BlockRequestByNumber(u64),
    BlockResponse(Option<Block>),
    /// Pull-based block-range sync; `sequence` matches the response to the
    /// in-flight request.
    SyncRequest {
        from_number: u64,
        max_blocks: u32,
        sequence: u64,
    },
    SyncResponse {
        sequence: u64,
        blocks: Vec<Block>,
    },
    FindNode {
        target: PeerId,
    },
    FindNodeResponse {
        peers: Vec<PeerAddr>,
    },
    /// Gossip control: content ids we hold.
    IHave(Vec<Hash256>),
    /// Gossip control: content ids we want.
    IWant(Vec<Hash256>),
    /// Promote the sender into our eager mesh.
    Graft,
    /// Demote the sender to the lazy tier.
    Prune,
}

const TAG_CONSENSUS: u8 = 0x10;
const TAG_TX_ANNOUNCE: u8 = 0x20;
const TAG_TX_PULL: u8 = 0x21;
const TAG_BLOCK_REQ_HASH: u8 = 0x30;
const TAG_BLOCK_REQ_NUMBER: u8 = 0x31;
const TAG_BLOCK_RESPONSE: u8 = 0x32;
const TAG_SYNC_REQUEST: u8 = 0x40;
const TAG_SYNC_RESPONSE: u8 = 0x41;
const TAG_FIND_NODE: u8 = 0x50;
const TAG_FIND_NODE_RESPONSE: u8 = 0x51;
const TAG_IHAVE: u8 = 0x60;
const TAG_IWANT: u8 = 0x61;
const TAG_GRAFT: u8 = 0x62;
const TAG_PRUNE: u8 = 0x63;

impl Encode for Payload {
    fn encode(&self, w: &mut Writer) {
        match self {
            Self::Consensus(m) => {
                w.put_u8(TAG_CONSENSUS);
                m.encode(w);
            }
            Self::TxAnnounce(txs) => {
                w.put_u8(TAG_TX_ANNOUNCE);
                txs.encode(w);
            }
            Self::TxPull(hashes) => {
                w.put_u8(TAG_TX_PULL);
                hashes.encode(w);
            }
            Self::BlockRequestByHash(hash) => {
                w.put_u8(TAG_BLOCK_REQ_HASH);
                hash.encode(w);
            }
            Self::BlockRequestByNumber(number) => {
                w.put_u8(TAG_BLOCK_REQ_NUMBER);
                w.put_u64(*number);
            }
            Self::BlockResponse(block) => {
                w.put_u8(TAG_BLOCK_RESPONSE);
                block.encode(w);
            }
            Self::SyncRequest {
                from_number,
                max_blocks,
                sequence,
            } => {
                w.put_u8(TAG_SYNC_REQUEST);
                w.put_u64(*from_number);
                w.put_u32(*max_blocks);
                w.put_u64(*sequence);
            }
            Self::SyncResponse { sequence, blocks } => {
                w.put_u8(TAG_SYNC_RESPONSE);
                w.put_u64(*sequence);
                blocks.encode(w);
            }
            Self::FindNode { target } => {
                w.put_u8(TAG_FIND_NODE);
                target.encode(w);
            }
            Self::FindNodeResponse { peers } => {
                w.put_u8(TAG_FIND_NODE_RESPONSE);
                peers.encode(w);
            }
            Self::IHave(ids) => {
                w.put_u8(TAG_IHAVE);
                ids.encode(w);
            }
            Self::IWant(ids) => {
                w.put_u8(TAG_IWANT);
                ids.encode(w);
            }
            Self::Graft => w.put_u8(TAG_GRAFT),
            Self::Prune => w.put_u8(TAG_PRUNE),
        }
    }
}

fn decode_capped_vec<T: Decode>(r: &mut Reader<'_>, max: usize) -> Result<Vec<T>, CodecError> {
    let count = r.read_count_capped(max)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(T::decode(r)?);
    }
    Ok(out)
}

impl Decode for Payload {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(match r.read_u8()? {
            TAG_CONSENSUS => Self::Consensus(ConsensusMessage::decode(r)?),
            TAG_TX_ANNOUNCE => Self::TxAnnounce(decode_capped_vec(r, MAX_ANNOUNCED_TXS)?),
            TAG_TX_PULL => Self::TxPull(decode_capped_vec(r, MAX_REQUESTED_HASHES)?),
            TAG_BLOCK_REQ_HASH => Self::BlockRequestByHash(Hash256::decode(r)?),
            TAG_BLOCK_REQ_NUMBER => Self::BlockRequestByNumber(r.read_u64()?),
            TAG_BLOCK_RESPONSE => Self::BlockResponse(Option::<Block>::decode(r)?),
            TAG_SYNC_REQUEST => {
                let from_number = r.read_u64()?;
                let max_blocks = r.read_u32()?;
                if max_blocks as usize > MAX_SYNC_BLOCKS {
                    return Err(CodecError::OversizedLength {
                        len: max_blocks as u64,
                        max: MAX_SYNC_BLOCKS as u64,
                    });
                }
                let sequence = r.read_u64()?;
                Self::SyncRequest {
                    from_number,
                    max_blocks,
                    sequence,
                }
            }
            TAG_SYNC_RESPONSE => {
                let sequence = r.read_u64()?;
                let blocks = decode_capped_vec(r, MAX_SYNC_BLOCKS)?;
                Self::SyncResponse { sequence, blocks }
            }
            TAG_FIND_NODE => Self::FindNode {
                target: PeerId::decode(r)?,
            },
            TAG_FIND_NODE_RESPONSE => Self::FindNodeResponse {
                peers: decode_capped_vec(r, MAX_FIND_NODE_PEERS)?,
            },
            TAG_IHAVE => Self::IHave(decode_capped_vec(r, MAX_GOSSIP_IDS)?),
            TAG_IWANT => Self::IWant(decode_capped_vec(r, MAX_GOSSIP_IDS)?),
            TAG_GRAFT => Self::Graft,
            TAG_PRUNE => Self::Prune,
            other => {
                return Err(CodecError::InvalidValue(format!("payload tag {other}")))
            }
        })
    }
}

/// The envelope around every post-handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: PeerId,
    pub timestamp_ms: u64,
    pub payload: Payload,
}

impl Envelope {
    /// Rejects stale or future-dated envelopes; called at parse time
    /// before the payload reaches any handler.
    pub fn validate_timestamp(&self, now_ms: u64) -> Result<(), basalt_types::NetworkError> {
        let age = now_ms.abs_diff(self.timestamp_ms);
        if age > MAX_TIMESTAMP_DRIFT_MS {
            return Err(basalt_types::NetworkError::TimestampDrift);
        }
        Ok(())
    }
}

impl Encode for Envelope {
    fn encode(&self, w: &mut Writer) {
        self.sender.encode(w);
        w.put_u64(self.timestamp_ms);
        self.payload.encode(w);
    }
}

impl Decode for Envelope {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            sender: PeerId::decode(r)?,
            timestamp_ms: r.read_u64()?,
            payload: Payload::decode(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_types::{from_bytes_canonical, to_bytes_canonical};

    #[test]
    fn payload_roundtrips() {
        let payloads = vec![
            Payload::TxPull(vec![Hash256([1; 32])]),
            Payload::BlockRequestByNumber(9),
            Payload::BlockResponse(None),
            Payload::SyncRequest {
                from_number: 10,
                max_blocks: 64,
                sequence: 3,
            },
            Payload::FindNode {
                target: PeerId([7; 32]),
            },
            Payload::FindNodeResponse {
                peers: vec![PeerAddr {
                    peer_id: PeerId([1; 32]),
                    addr: "127.0.0.1:30300".parse().unwrap(),
                }],
            },
            Payload::IHave(vec![Hash256([2; 32]), Hash256([3; 32])]),
            Payload::Graft,
        ];
        for payload in payloads {
            let envelope = Envelope {
                sender: PeerId([9; 32]),
                timestamp_ms: 1_000,
                payload,
            };
            let bytes = to_bytes_canonical(&envelope);
            assert_eq!(from_bytes_canonical::<Envelope>(&bytes).unwrap(), envelope);
        }
    }

    #[test]
    fn oversized_sync_request_is_rejected_at_parse() {
        let payload = Payload::SyncRequest {
            from_number: 0,
            max_blocks: (MAX_SYNC_BLOCKS + 1) as u32,
            sequence: 0,
        };
        let bytes = to_bytes_canonical(&payload);
        assert!(from_bytes_canonical::<Payload>(&bytes).is_err());
    }

    #[test]
    fn timestamp_drift_is_bounded_both_ways() {
        let envelope = Envelope {
            sender: PeerId([1; 32]),
            timestamp_ms: 100_000,
            payload: Payload::Prune,
        };
        assert!(envelope.validate_timestamp(100_000).is_ok());
        assert!(envelope.validate_timestamp(100_000 + MAX_TIMESTAMP_DRIFT_MS).is_ok());
        assert!(envelope
            .validate_timestamp(100_001 + MAX_TIMESTAMP_DRIFT_MS)
            .is_err());
        // A message from the future is just as invalid.
        assert!(envelope
            .validate_timestamp(100_000 - MAX_TIMESTAMP_DRIFT_MS - 1)
            .is_err());
    }

    #[test]
    fn unknown_payload_tag_is_rejected() {
        assert!(from_bytes_canonical::<Payload>(&[0xEE]).is_err());
    }
}
