//! Authenticated peer networking for the Basalt node: encrypted framed
//! transport, the mutual handshake, the XOR-distance peer table, reputation
//! and gossip.

pub mod framing;
pub mod gossip;
pub mod handshake;
pub mod limits;
pub mod peer_table;
pub mod reputation;
pub mod wire;

pub use framing::{SecureReceiver, SecureSender, FRAME_READ_TIMEOUT, MAX_FRAME_LEN};
pub use gossip::{message_id, Dissemination, GossipRouter, SeenCache};
pub use handshake::{perform_handshake, Established, HandshakeConfig};
pub use limits::{ConnectionLimits, ConnectionPermit, LimitConfig};
pub use peer_table::{PeerEntry, PeerTable, BUCKET_SIZE, MAX_PER_SUBNET};
pub use reputation::{Reputation, BAN_WINDOW_MS, SCORE_MAX, SCORE_START};
pub use wire::{Envelope, Payload, PeerAddr, MAX_TIMESTAMP_DRIFT_MS};
