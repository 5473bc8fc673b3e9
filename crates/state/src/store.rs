//! Hash-addressed node storage behind the trie.
//!
//! The canonical state sits on a persistent base store; every fork layers an
//! [`OverlayNodeStore`] on top so speculative execution writes nodes without
//! touching the base. On swap the overlay is drained into a write batch.

use basalt_types::{Hash256, StateError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A content-addressed store of encoded trie nodes.
pub trait NodeStore: Send + Sync {
    fn get_node(&self, hash: &Hash256) -> Result<Option<Vec<u8>>, StateError>;
    fn put_node(&self, hash: Hash256, bytes: Vec<u8>) -> Result<(), StateError>;

    /// Reachability-based pruning slot: drop every node not reachable from
    /// `roots`. Backends that cannot enumerate nodes report `Backend`;
    /// nothing in the node ever deletes trie nodes outside this call.
    fn retain_reachable(&self, _roots: &[Hash256]) -> Result<usize, StateError> {
        Err(StateError::Backend(
            "this node store does not support pruning".into(),
        ))
    }
}

/// Plain in-memory node store; the base store in tests and the genesis
/// bootstrap path.
#[derive(Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<HashMap<Hash256, Vec<u8>>>,
}

impl MemoryNodeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeStore for MemoryNodeStore {
    fn get_node(&self, hash: &Hash256) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.nodes.read().get(hash).cloned())
    }

    fn put_node(&self, hash: Hash256, bytes: Vec<u8>) -> Result<(), StateError> {
        self.nodes.write().insert(hash, bytes);
        Ok(())
    }

    fn retain_reachable(&self, roots: &[Hash256]) -> Result<usize, StateError> {
        let reachable = mark_reachable(self, roots)?;
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|hash, _| reachable.contains_key(hash));
        Ok(before - nodes.len())
    }
}

/// Copy-on-write layer over a base store. Reads fall through; writes stay in
/// the overlay until drained.
pub struct OverlayNodeStore {
    base: Arc<dyn NodeStore>,
    overlay: RwLock<HashMap<Hash256, Vec<u8>>>,
}

impl OverlayNodeStore {
    pub fn wrap(base: Arc<dyn NodeStore>) -> Arc<Self> {
        Arc::new(Self {
            base,
            overlay: RwLock::new(HashMap::new()),
        })
    }

    /// Takes every node written since the last drain, leaving the overlay
    /// empty. The caller persists them atomically with the rest of the
    /// block's writes.
    pub fn drain(&self) -> Vec<(Hash256, Vec<u8>)> {
        self.overlay.write().drain().collect()
    }

    pub fn overlay_len(&self) -> usize {
        self.overlay.read().len()
    }
}

impl NodeStore for OverlayNodeStore {
    fn get_node(&self, hash: &Hash256) -> Result<Option<Vec<u8>>, StateError> {
        if let Some(bytes) = self.overlay.read().get(hash) {
            return Ok(Some(bytes.clone()));
        }
        self.base.get_node(hash)
    }

    fn put_node(&self, hash: Hash256, bytes: Vec<u8>) -> Result<(), StateError> {
        self.overlay.write().insert(hash, bytes);
        Ok(())
    }
}

/// Mark phase of the reachability sweep: walks every trie rooted at `roots`
/// and collects the hashes of live nodes.
pub fn mark_reachable(
    store: &dyn NodeStore,
    roots: &[Hash256],
) -> Result<HashMap<Hash256, ()>, StateError> {
    use crate::trie::node::Node;

    let mut live: HashMap<Hash256, ()> = HashMap::new();
    let mut stack: Vec<Hash256> = roots.iter().copied().filter(|r| !r.is_zero()).collect();

    while let Some(hash) = stack.pop() {
        if live.contains_key(&hash) {
            continue;
        }
        let Some(bytes) = store.get_node(&hash)? else {
            // A missing node under a recent root is corruption, but the
            // mark phase is advisory; skip rather than fail the sweep.
            continue;
        };
        let node = Node::decode(&bytes).map_err(|e| StateError::Decode(e.to_string()))?;
        live.insert(hash, ());
        match node {
            Node::Leaf { ref value, .. } => {
                // Account leaves embed a storage root that keeps a whole
                // storage trie alive.
                if let Ok(account) =
                    basalt_types::from_bytes_canonical::<basalt_types::AccountState>(value)
                {
                    if !account.storage_root.is_zero() {
                        stack.push(account.storage_root);
                    }
                }
            }
            Node::Extension { child, .. } => stack.push(child),
            Node::Branch { children, .. } => {
                stack.extend(children.iter().flatten().copied());
            }
        }
    }
    Ok(live)
}
