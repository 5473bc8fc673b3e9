//! XOR-distance routing table with subnet diversity.
//!
//! Buckets are indexed by the length of the common prefix between our peer
//! id and the peer's. Each bucket caps members per IPv4 /24 (IPv6 /48), and
//! a full bucket rejects newcomers outright — long-lived peers are the ones
//! an eclipse attacker cannot cheaply replace. A few slots per bucket are
//! reserved for outbound connections, which the attacker does not choose.

use basalt_types::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

pub const BUCKET_SIZE: usize = 16;
pub const MAX_PER_SUBNET: usize = 2;
/// Bucket slots that only outbound-dialed peers may occupy.
pub const OUTBOUND_RESERVED: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub peer_id: PeerId,
    pub addr: SocketAddr,
    pub last_seen_ms: u64,
    pub best_block: u64,
    /// True when we dialed the peer.
    pub outbound: bool,
}

/// The subnet key a bucket's diversity cap groups by: /24 for IPv4, /48
/// for IPv6.
fn subnet_key(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(ip) => ip.octets()[..3].to_vec(),
        IpAddr::V6(ip) => ip.octets()[..6].to_vec(),
    }
}

/// Index of the bucket for a given distance: the number of leading zero
/// bits of the XOR distance.
fn bucket_index(local: &PeerId, remote: &PeerId) -> usize {
    let distance = local.distance(remote);
    let mut zeros = 0usize;
    for byte in distance {
        if byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros() as usize;
            break;
        }
    }
    zeros.min(255)
}

#[derive(Default)]
struct Bucket {
    entries: Vec<PeerEntry>,
}

impl Bucket {
    fn subnet_count(&self, key: &[u8]) -> usize {
        self.entries
            .iter()
            .filter(|e| subnet_key(&e.addr.ip()) == key)
            .count()
    }

    fn inbound_capacity(&self) -> usize {
        BUCKET_SIZE - OUTBOUND_RESERVED
    }
}

pub struct PeerTable {
    local: PeerId,
    buckets: RwLock<HashMap<usize, Bucket>>,
}

impl PeerTable {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    /// Attempts to add a peer. Returns `false` when the bucket, its
    /// inbound share, or the subnet quota is already full — the incumbent
    /// stays, the newcomer is dropped.
    pub fn insert(&self, entry: PeerEntry) -> bool {
        if entry.peer_id == self.local {
            return false;
        }
        let index = bucket_index(&self.local, &entry.peer_id);
        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(index).or_default();

        if let Some(existing) = bucket
            .entries
            .iter_mut()
            .find(|e| e.peer_id == entry.peer_id)
        {
            // Known peer: refresh liveness, never duplicate.
            existing.last_seen_ms = entry.last_seen_ms;
            existing.best_block = entry.best_block;
            return true;
        }
        if bucket.entries.len() >= BUCKET_SIZE {
            return false;
        }
        if !entry.outbound {
            let inbound = bucket.entries.iter().filter(|e| !e.outbound).count();
            if inbound >= bucket.inbound_capacity() {
                return false;
            }
        }
        if bucket.subnet_count(&subnet_key(&entry.addr.ip())) >= MAX_PER_SUBNET {
            return false;
        }
        bucket.entries.push(entry);
        true
    }

    pub fn remove(&self, peer_id: &PeerId) {
        let index = bucket_index(&self.local, peer_id);
        if let Some(bucket) = self.buckets.write().get_mut(&index) {
            bucket.entries.retain(|e| e.peer_id != *peer_id);
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<PeerEntry> {
        let index = bucket_index(&self.local, peer_id);
        self.buckets
            .read()
            .get(&index)
            .and_then(|b| b.entries.iter().find(|e| e.peer_id == *peer_id).cloned())
    }

    pub fn mark_seen(&self, peer_id: &PeerId, now_ms: u64, best_block: u64) {
        let index = bucket_index(&self.local, peer_id);
        if let Some(bucket) = self.buckets.write().get_mut(&index) {
            if let Some(entry) = bucket.entries.iter_mut().find(|e| e.peer_id == *peer_id) {
                entry.last_seen_ms = now_ms;
                entry.best_block = entry.best_block.max(best_block);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.read().values().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `k` peers closest to `target` by XOR distance.
    pub fn closest(&self, target: &PeerId, k: usize) -> Vec<PeerEntry> {
        let mut all: Vec<PeerEntry> = self
            .buckets
            .read()
            .values()
            .flat_map(|b| b.entries.iter().cloned())
            .collect();
        all.sort_by(|a, b| a.peer_id.distance(target).cmp(&b.peer_id.distance(target)));
        all.truncate(k);
        all
    }

    pub fn all_peers(&self) -> Vec<PeerEntry> {
        self.buckets
            .read()
            .values()
            .flat_map(|b| b.entries.iter().cloned())
            .collect()
    }
}
