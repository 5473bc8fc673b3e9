//! Peer reputation with lock-free score updates.
//!
//! Scores live in `[0, SCORE_MAX]` and move through compare-and-swap loops
//! with clamping, so concurrent penalties and rewards never tear. Hitting
//! zero bans the peer for a fixed window; rewards are capped per time
//! window so a peer cannot grind its score up between offences.

use basalt_types::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::warn;

pub const SCORE_MAX: u32 = 200;
pub const SCORE_START: u32 = 100;
/// Instant-ban threshold for severe infractions.
pub const SCORE_BAN: u32 = 0;
pub const BAN_WINDOW_MS: u64 = 10 * 60 * 1_000;
/// Most reward a peer can accumulate within one reward window.
pub const REWARD_CAP_PER_WINDOW: u32 = 20;
pub const REWARD_WINDOW_MS: u64 = 60 * 1_000;

struct PeerScore {
    score: AtomicU32,
    reward_window: RwLock<(u64, u32)>,
}

#[derive(Default)]
pub struct Reputation {
    peers: RwLock<HashMap<PeerId, Arc<PeerScore>>>,
    bans: RwLock<HashMap<PeerId, u64>>,
}

impl Reputation {
    pub fn new() -> Self {
        Self::default()
    }

    fn peer(&self, peer_id: &PeerId) -> Arc<PeerScore> {
        if let Some(score) = self.peers.read().get(peer_id) {
            return score.clone();
        }
        self.peers
            .write()
            .entry(*peer_id)
            .or_insert_with(|| {
                Arc::new(PeerScore {
                    score: AtomicU32::new(SCORE_START),
                    reward_window: RwLock::new((0, 0)),
                })
            })
            .clone()
    }

    pub fn score(&self, peer_id: &PeerId) -> u32 {
        self.peer(peer_id).score.load(Ordering::Relaxed)
    }

    /// Applies a penalty via CAS with a floor of zero; hitting the floor
    /// bans the peer.
    pub fn penalize(&self, peer_id: &PeerId, amount: u32, now_ms: u64) {
        let peer = self.peer(peer_id);
        let result = peer
            .score
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(amount))
            });
        if let Ok(previous) = result {
            let new = previous.saturating_sub(amount);
            if new == SCORE_BAN {
                self.ban(peer_id, now_ms);
            }
        }
    }

    /// Applies a reward via CAS with a ceiling of `SCORE_MAX`, rate-limited
    /// per window.
    pub fn reward(&self, peer_id: &PeerId, amount: u32, now_ms: u64) {
        let peer = self.peer(peer_id);
        let granted = {
            let mut window = peer.reward_window.write();
            if now_ms.saturating_sub(window.0) >= REWARD_WINDOW_MS {
                *window = (now_ms, 0);
            }
            let available = REWARD_CAP_PER_WINDOW.saturating_sub(window.1);
            let granted = amount.min(available);
            window.1 += granted;
            granted
        };
        if granted == 0 {
            return;
        }
        let _ = peer
            .score
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some((current.saturating_add(granted)).min(SCORE_MAX))
            });
    }

    /// Severe infraction: straight to banned, score to the floor.
    pub fn ban_now(&self, peer_id: &PeerId, now_ms: u64) {
        let peer = self.peer(peer_id);
        peer.score.store(SCORE_BAN, Ordering::Relaxed);
        self.ban(peer_id, now_ms);
    }

    fn ban(&self, peer_id: &PeerId, now_ms: u64) {
        warn!(target: "net", peer = %peer_id, "peer banned");
        self.bans
            .write()
            .insert(*peer_id, now_ms + BAN_WINDOW_MS);
    }

    /// Bans expire after their window; an expired ban restores a minimal
    /// working score.
    pub fn is_banned(&self, peer_id: &PeerId, now_ms: u64) -> bool {
        let expired = {
            let bans = self.bans.read();
            match bans.get(peer_id) {
                Some(until) if now_ms < *until => return true,
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.bans.write().remove(peer_id);
            let peer = self.peer(peer_id);
            let _ = peer.score.compare_exchange(
                SCORE_BAN,
                1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
        }
        false
    }
}
