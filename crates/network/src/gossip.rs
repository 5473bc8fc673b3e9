//! Gossip: mesh + lazy tiers, seen-message deduplication, and bounded
//! IHAVE/IWANT control flow.

use basalt_crypto::blake3_hash;
use basalt_types::{Hash256, PeerId};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;

/// Bound on the seen-cache; combined with the TTL this caps both memory
/// and the window a duplicate can slip through after eviction.
pub const SEEN_CACHE_SIZE: usize = 65_536;
pub const SEEN_TTL_MS: u64 = 120_000;
/// How many content ids a peer may request per IWANT window.
pub const IWANT_BUDGET_PER_WINDOW: usize = 64;
pub const IWANT_WINDOW_MS: u64 = 10_000;
/// How many of our recent IHAVE advertisements stay answerable.
const ADVERTISED_WINDOW: usize = 4_096;

/// The content id of a gossiped message.
pub fn message_id(bytes: &[u8]) -> Hash256 {
    blake3_hash(bytes)
}

/// Bounded, TTL'd deduplication of gossip message ids. The check runs
/// before any handler touches the message.
pub struct SeenCache {
    inner: Mutex<LruCache<Hash256, u64>>,
    ttl_ms: u64,
}

impl SeenCache {
    pub fn new() -> Self {
        Self::with_capacity(SEEN_CACHE_SIZE, SEEN_TTL_MS)
    }

    pub fn with_capacity(capacity: usize, ttl_ms: u64) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity is non-zero"),
            )),
            ttl_ms,
        }
    }

    /// True exactly once per id within the TTL.
    pub fn first_seen(&self, id: Hash256, now_ms: u64) -> bool {
        let mut cache = self.inner.lock();
        match cache.get(&id) {
            Some(inserted) if now_ms.saturating_sub(*inserted) < self.ttl_ms => false,
            _ => {
                cache.put(id, now_ms);
                true
            }
        }
    }

    pub fn contains(&self, id: &Hash256, now_ms: u64) -> bool {
        let mut cache = self.inner.lock();
        matches!(cache.get(id), Some(inserted) if now_ms.saturating_sub(*inserted) < self.ttl_ms)
    }
}

impl Default for SeenCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a message should travel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dissemination {
    /// Full message to the eager mesh.
    pub eager: Vec<PeerId>,
    /// IHAVE announcement to the lazy tier.
    pub lazy: Vec<PeerId>,
}

struct IwantWindow {
    window_start_ms: u64,
    used: usize,
}

/// Mesh membership and gossip control-flow accounting.
pub struct GossipRouter {
    seen: SeenCache,
    state: Mutex<RouterState>,
}

struct RouterState {
    eager: HashSet<PeerId>,
    lazy: HashSet<PeerId>,
    /// Ids we recently advertised, the only ids an IWANT may pull.
    advertised: HashSet<Hash256>,
    advertised_order: VecDeque<Hash256>,
    iwant_budgets: HashMap<PeerId, IwantWindow>,
}

impl GossipRouter {
    pub fn new() -> Self {
        Self {
            seen: SeenCache::new(),
            state: Mutex::new(RouterState {
                eager: HashSet::new(),
                lazy: HashSet::new(),
                advertised: HashSet::new(),
                advertised_order: VecDeque::new(),
                iwant_budgets: HashMap::new(),
            }),
        }
    }

    pub fn seen(&self) -> &SeenCache {
        &self.seen
    }

    /// New peers start lazy; GRAFT promotes them.
    pub fn add_peer(&self, peer: PeerId) {
        let mut state = self.state.lock();
        if !state.eager.contains(&peer) {
            state.lazy.insert(peer);
        }
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        let mut state = self.state.lock();
        state.eager.remove(peer);
        state.lazy.remove(peer);
        state.iwant_budgets.remove(peer);
    }

    pub fn graft(&self, peer: PeerId) {
        let mut state = self.state.lock();
        state.lazy.remove(&peer);
        state.eager.insert(peer);
    }

    pub fn prune(&self, peer: PeerId) {
        let mut state = self.state.lock();
        state.eager.remove(&peer);
        state.lazy.insert(peer);
    }

    /// Plans dissemination of a message we publish or forward, recording
    /// the id as advertised. `exclude` is the peer it came from.
    pub fn disseminate(
        &self,
        id: Hash256,
        exclude: Option<&PeerId>,
    ) -> Dissemination {
        let mut state = self.state.lock();
        state.advertised.insert(id);
        state.advertised_order.push_back(id);
        while state.advertised_order.len() > ADVERTISED_WINDOW {
            if let Some(old) = state.advertised_order.pop_front() {
                state.advertised.remove(&old);
            }
        }
        Dissemination {
            eager: state
                .eager
                .iter()
                .filter(|p| Some(*p) != exclude)
                .copied()
                .collect(),
            lazy: state
                .lazy
                .iter()
                .filter(|p| Some(*p) != exclude)
                .copied()
                .collect(),
        }
    }

    /// Handles an incoming IHAVE: the subset of ids we have not seen and
    /// want pulled.
    pub fn on_ihave(&self, ids: &[Hash256], now_ms: u64) -> Vec<Hash256> {
        ids.iter()
            .filter(|id| !self.seen.contains(id, now_ms))
            .copied()
            .collect()
    }

    /// Handles an incoming IWANT: only recently advertised ids count, and
    /// each peer spends a bounded budget per window. An adversary cannot
    /// force unbounded cache reads.
    pub fn on_iwant(&self, peer: &PeerId, ids: &[Hash256], now_ms: u64) -> Vec<Hash256> {
        let mut state = self.state.lock();
        let window = state
            .iwant_budgets
            .entry(*peer)
            .or_insert(IwantWindow {
                window_start_ms: now_ms,
                used: 0,
            });
        if now_ms.saturating_sub(window.window_start_ms) >= IWANT_WINDOW_MS {
            window.window_start_ms = now_ms;
            window.used = 0;
        }
        let available = IWANT_BUDGET_PER_WINDOW.saturating_sub(window.used);
        let mut granted = Vec::new();
        for id in ids.iter().take(available) {
            if state.advertised.contains(id) {
                granted.push(*id);
            }
        }
        let used = granted.len();
        if let Some(window) = state.iwant_budgets.get_mut(peer) {
            window.used += used;
        }
        granted
    }
}

impl Default for GossipRouter {
    fn default() -> Self {
        Self::new()
    }
}
