//! Merkle Patricia Trie over a hash-addressed node store.
//!
//! Nodes are immutable: every mutation path-copies from the touched leaf up
//! to the root, so old roots stay readable until pruned. Equal key/value
//! sets produce equal roots regardless of insertion order.

pub mod nibble;
pub mod node;
mod proof;

pub use proof::verify_proof;

use basalt_types::{Hash256, StateError};
use nibble::Nibbles;
use node::Node;
use std::sync::Arc;

use crate::store::NodeStore;

#[derive(Clone)]
pub struct Trie {
    store: Arc<dyn NodeStore>,
    root: Hash256,
}

impl Trie {
    /// Opens a trie at the given root. `Hash256::ZERO` is the empty trie.
    pub fn new(store: Arc<dyn NodeStore>, root: Hash256) -> Self {
        Self { store, root }
    }

    pub fn root(&self) -> Hash256 {
        self.root
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    fn load(&self, hash: &Hash256) -> Result<Node, StateError> {
        let bytes = self
            .store
            .get_node(hash)?
            .ok_or(StateError::MissingNode(*hash))?;
        Node::decode(&bytes).map_err(|e| StateError::Decode(e.to_string()))
    }

    fn write(&self, node: &Node) -> Result<Hash256, StateError> {
        let hash = node.hash();
        self.store.put_node(hash, node.encode())?;
        Ok(hash)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        if self.root.is_zero() {
            return Ok(None);
        }
        self.get_at(&self.root, &Nibbles::from_key(key))
    }

    fn get_at(&self, hash: &Hash256, path: &Nibbles) -> Result<Option<Vec<u8>>, StateError> {
        match self.load(hash)? {
            Node::Leaf {
                path: leaf_path,
                value,
            } => Ok((leaf_path == *path).then_some(value)),
            Node::Extension {
                path: ext_path,
                child,
            } => {
                if path.len() >= ext_path.len()
                    && path.common_prefix(&ext_path) == ext_path.len()
                {
                    self.get_at(&child, &path.slice(ext_path.len()))
                } else {
                    Ok(None)
                }
            }
            Node::Branch { children, value } => {
                if path.is_empty() {
                    Ok(value)
                } else {
                    match children[path.at(0) as usize] {
                        Some(child) => self.get_at(&child, &path.slice(1)),
                        None => Ok(None),
                    }
                }
            }
        }
    }

    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StateError> {
        let path = Nibbles::from_key(key);
        let current = (!self.root.is_zero()).then_some(self.root);
        self.root = self.insert_at(current, path, value)?;
        Ok(())
    }

    fn insert_at(
        &self,
        current: Option<Hash256>,
        path: Nibbles,
        value: Vec<u8>,
    ) -> Result<Hash256, StateError> {
        let Some(hash) = current else {
            return self.write(&Node::Leaf { path, value });
        };

        match self.load(&hash)? {
            Node::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                let common = path.common_prefix(&leaf_path);
                if common == leaf_path.len() && common == path.len() {
                    return self.write(&Node::Leaf { path, value });
                }
                // Split: a branch at the divergence point, with an extension
                // above it when the shared prefix is non-empty.
                let mut branch_children: [Option<Hash256>; 16] = [None; 16];
                let mut branch_value = None;
                for (p, v) in [(leaf_path, leaf_value), (path.clone(), value)] {
                    let rem = p.slice(common);
                    if rem.is_empty() {
                        branch_value = Some(v);
                    } else {
                        let leaf = Node::Leaf {
                            path: rem.slice(1),
                            value: v,
                        };
                        branch_children[rem.at(0) as usize] = Some(self.write(&leaf)?);
                    }
                }
                let branch_hash = self.write(&Node::Branch {
                    children: branch_children,
                    value: branch_value,
                })?;
                if common > 0 {
                    self.write(&Node::Extension {
                        path: path.slice_to(common),
                        child: branch_hash,
                    })
                } else {
                    Ok(branch_hash)
                }
            }
            Node::Extension {
                path: ext_path,
                child,
            } => {
                let common = path.common_prefix(&ext_path);
                if common == ext_path.len() {
                    let new_child = self.insert_at(Some(child), path.slice(common), value)?;
                    return self.write(&Node::Extension {
                        path: ext_path,
                        child: new_child,
                    });
                }
                let mut branch_children: [Option<Hash256>; 16] = [None; 16];
                let mut branch_value = None;

                let ext_rem = ext_path.slice(common);
                let child_slot = if ext_rem.len() == 1 {
                    child
                } else {
                    self.write(&Node::Extension {
                        path: ext_rem.slice(1),
                        child,
                    })?
                };
                branch_children[ext_rem.at(0) as usize] = Some(child_slot);

                let key_rem = path.slice(common);
                if key_rem.is_empty() {
                    branch_value = Some(value);
                } else {
                    let leaf = Node::Leaf {
                        path: key_rem.slice(1),
                        value,
                    };
                    branch_children[key_rem.at(0) as usize] = Some(self.write(&leaf)?);
                }

                let branch_hash = self.write(&Node::Branch {
                    children: branch_children,
                    value: branch_value,
                })?;
                if common > 0 {
                    self.write(&Node::Extension {
                        path: path.slice_to(common),
                        child: branch_hash,
                    })
                } else {
                    Ok(branch_hash)
                }
            }
            Node::Branch {
                mut children,
                value: branch_value,
            } => {
                if path.is_empty() {
                    return self.write(&Node::Branch {
                        children,
                        value: Some(value),
                    });
                }
                let idx = path.at(0) as usize;
                let new_child = self.insert_at(children[idx], path.slice(1), value)?;
                children[idx] = Some(new_child);
                self.write(&Node::Branch {
                    children,
                    value: branch_value,
                })
            }
        }
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), StateError> {
        if self.root.is_zero() {
            return Ok(());
        }
        let path = Nibbles::from_key(key);
        self.root = match self.delete_at(&self.root, &path)? {
            Some(node) => self.write(&node)?,
            None => Hash256::ZERO,
        };
        Ok(())
    }

    /// Deletes under `hash`, returning the replacement node (already
    /// collapsed) or `None` when the subtree becomes empty.
    fn delete_at(&self, hash: &Hash256, path: &Nibbles) -> Result<Option<Node>, StateError> {
        match self.load(hash)? {
            Node::Leaf {
                path: leaf_path,
                value,
            } => {
                if leaf_path == *path {
                    Ok(None)
                } else {
                    Ok(Some(Node::Leaf {
                        path: leaf_path,
                        value,
                    }))
                }
            }
            Node::Extension {
                path: ext_path,
                child,
            } => {
                if path.len() < ext_path.len()
                    || path.common_prefix(&ext_path) != ext_path.len()
                {
                    return Ok(Some(Node::Extension {
                        path: ext_path,
                        child,
                    }));
                }
                match self.delete_at(&child, &path.slice(ext_path.len()))? {
                    None => Ok(None),
                    // An extension always hangs above a branch; when the
                    // branch collapses the extension absorbs its path.
                    Some(Node::Leaf {
                        path: sub_path,
                        value,
                    }) => Ok(Some(Node::Leaf {
                        path: ext_path.join(&sub_path),
                        value,
                    })),
                    Some(Node::Extension {
                        path: sub_path,
                        child: sub_child,
                    }) => Ok(Some(Node::Extension {
                        path: ext_path.join(&sub_path),
                        child: sub_child,
                    })),
                    Some(branch) => {
                        let branch_hash = self.write(&branch)?;
                        Ok(Some(Node::Extension {
                            path: ext_path,
                            child: branch_hash,
                        }))
                    }
                }
            }
            Node::Branch {
                mut children,
                mut value,
            } => {
                if path.is_empty() {
                    value = None;
                } else {
                    let idx = path.at(0) as usize;
                    match children[idx] {
                        None => {
                            return Ok(Some(Node::Branch { children, value }));
                        }
                        Some(child) => {
                            children[idx] = match self.delete_at(&child, &path.slice(1))? {
                                Some(node) => Some(self.write(&node)?),
                                None => None,
                            };
                        }
                    }
                }
                self.collapse_branch(children, value)
            }
        }
    }

    /// Restores the canonical form after a branch lost a child or its value.
    fn collapse_branch(
        &self,
        children: [Option<Hash256>; 16],
        value: Option<Vec<u8>>,
    ) -> Result<Option<Node>, StateError> {
        let child_count = children.iter().flatten().count();
        if child_count == 0 {
            return Ok(value.map(|v| Node::Leaf {
                path: Nibbles::default(),
                value: v,
            }));
        }
        match (child_count, &value) {
            (1, None) => {
                let (idx, child_hash) = children
                    .iter()
                    .enumerate()
                    .find_map(|(i, c)| c.map(|h| (i as u8, h)))
                    .expect("child_count == 1");
                match self.load(&child_hash)? {
                    Node::Leaf { path, value } => Ok(Some(Node::Leaf {
                        path: path.prepend(idx),
                        value,
                    })),
                    Node::Extension { path, child } => Ok(Some(Node::Extension {
                        path: path.prepend(idx),
                        child,
                    })),
                    Node::Branch { .. } => Ok(Some(Node::Extension {
                        path: Nibbles::from_raw(vec![idx]),
                        child: child_hash,
                    })),
                }
            }
            _ => Ok(Some(Node::Branch { children, value })),
        }
    }

    /// Collects the encoded nodes along the lookup path of `key`, root
    /// first. Verifiable against the root with [`verify_proof`].
    pub fn prove(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, StateError> {
        let mut witness = Vec::new();
        if self.root.is_zero() {
            return Ok(witness);
        }
        let mut hash = self.root;
        let mut path = Nibbles::from_key(key);
        loop {
            let bytes = self
                .store
                .get_node(&hash)?
                .ok_or(StateError::MissingNode(hash))?;
            let node = Node::decode(&bytes).map_err(|e| StateError::Decode(e.to_string()))?;
            witness.push(bytes);
            match node {
                Node::Leaf { .. } => return Ok(witness),
                Node::Extension {
                    path: ext_path,
                    child,
                } => {
                    if path.len() < ext_path.len()
                        || path.common_prefix(&ext_path) != ext_path.len()
                    {
                        return Ok(witness);
                    }
                    path = path.slice(ext_path.len());
                    hash = child;
                }
                Node::Branch { children, .. } => {
                    if path.is_empty() {
                        return Ok(witness);
                    }
                    match children[path.at(0) as usize] {
                        Some(child) => {
                            path = path.slice(1);
                            hash = child;
                        }
                        None => return Ok(witness),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryNodeStore;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn empty_trie() -> Trie {
        Trie::new(MemoryNodeStore::new(), Hash256::ZERO)
    }

    #[test]
    fn insert_get_roundtrip() {
        let mut trie = empty_trie();
        trie.insert(b"doe", b"reindeer".to_vec()).unwrap();
        trie.insert(b"dog", b"puppy".to_vec()).unwrap();
        trie.insert(b"dogglesworth", b"cat".to_vec()).unwrap();

        assert_eq!(trie.get(b"doe").unwrap(), Some(b"reindeer".to_vec()));
        assert_eq!(trie.get(b"dog").unwrap(), Some(b"puppy".to_vec()));
        assert_eq!(trie.get(b"dogglesworth").unwrap(), Some(b"cat".to_vec()));
        assert_eq!(trie.get(b"d").unwrap(), None);
        assert_eq!(trie.get(b"doge").unwrap(), None);
    }

    #[test]
    fn overwrite_updates_root() {
        let mut trie = empty_trie();
        trie.insert(b"key", vec![1]).unwrap();
        let root_one = trie.root();
        trie.insert(b"key", vec![2]).unwrap();
        assert_ne!(trie.root(), root_one);
        assert_eq!(trie.get(b"key").unwrap(), Some(vec![2]));
    }

    #[test]
    fn delete_restores_previous_root() {
        let mut trie = empty_trie();
        trie.insert(b"alpha", vec![1]).unwrap();
        let root_before = trie.root();

        trie.insert(b"beta", vec![2]).unwrap();
        trie.delete(b"beta").unwrap();
        assert_eq!(trie.root(), root_before);

        trie.delete(b"alpha").unwrap();
        assert_eq!(trie.root(), Hash256::ZERO);
        assert_eq!(trie.get(b"alpha").unwrap(), None);
    }

    #[test]
    fn delete_of_absent_key_is_a_noop() {
        let mut trie = empty_trie();
        trie.insert(b"exists", vec![1]).unwrap();
        let root = trie.root();
        trie.delete(b"missing").unwrap();
        assert_eq!(trie.root(), root);
    }

    #[test]
    fn branch_collapse_preserves_remaining_entries() {
        let mut trie = empty_trie();
        // Keys that fan out under a shared prefix.
        trie.insert(&[0x12, 0x34], vec![1]).unwrap();
        trie.insert(&[0x12, 0x35], vec![2]).unwrap();
        trie.insert(&[0x12], vec![3]).unwrap();

        trie.delete(&[0x12, 0x35]).unwrap();
        assert_eq!(trie.get(&[0x12, 0x34]).unwrap(), Some(vec![1]));
        assert_eq!(trie.get(&[0x12]).unwrap(), Some(vec![3]));

        trie.delete(&[0x12]).unwrap();
        assert_eq!(trie.get(&[0x12, 0x34]).unwrap(), Some(vec![1]));
        assert_eq!(trie.get(&[0x12]).unwrap(), None);
    }

    proptest! {
        /// Property: equal key/value sets produce equal roots regardless of
        /// insertion order.
        #[test]
        fn root_is_insertion_order_independent(
            entries in proptest::collection::btree_map(
                proptest::collection::vec(any::<u8>(), 1..8),
                proptest::collection::vec(any::<u8>(), 1..16),
                1..40,
            ),
            seed in any::<u64>(),
        ) {
            let mut forward = empty_trie();
            for (k, v) in &entries {
                forward.insert(k, v.clone()).unwrap();
            }

            // A deterministic shuffle of the same entries.
            let mut shuffled: Vec<_> = entries.iter().collect();
            let mut state = seed;
            for i in (1..shuffled.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state % (i as u64 + 1)) as usize;
                shuffled.swap(i, j);
            }
            let mut permuted = empty_trie();
            for (k, v) in shuffled {
                permuted.insert(k, v.clone()).unwrap();
            }

            prop_assert_eq!(forward.root(), permuted.root());
        }

        /// Property: inserting then deleting a disjoint overlay of keys
        /// returns to the original root.
        #[test]
        fn delete_is_inverse_of_insert(
            base in proptest::collection::btree_map(
                proptest::collection::vec(any::<u8>(), 1..6),
                proptest::collection::vec(any::<u8>(), 1..8),
                0..20,
            ),
            extra in proptest::collection::btree_map(
                proptest::collection::vec(any::<u8>(), 7..9),
                proptest::collection::vec(any::<u8>(), 1..8),
                1..20,
            ),
        ) {
            // `extra` keys are longer than `base` keys, hence disjoint.
            let mut trie = empty_trie();
            for (k, v) in &base {
                trie.insert(k, v.clone()).unwrap();
            }
            let root_before = trie.root();
            for (k, v) in &extra {
                trie.insert(k, v.clone()).unwrap();
            }
            for k in extra.keys() {
                trie.delete(k).unwrap();
            }
            prop_assert_eq!(trie.root(), root_before);
        }

        /// Property: lookups agree with a model BTreeMap.
        #[test]
        fn lookup_agrees_with_model(
            entries in proptest::collection::btree_map(
                proptest::collection::vec(any::<u8>(), 1..6),
                proptest::collection::vec(any::<u8>(), 1..8),
                0..30,
            ),
            probes in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 1..6),
                1..10,
            ),
        ) {
            let mut trie = empty_trie();
            let model: BTreeMap<_, _> = entries.clone();
            for (k, v) in &entries {
                trie.insert(k, v.clone()).unwrap();
            }
            for probe in probes {
                prop_assert_eq!(trie.get(&probe).unwrap(), model.get(&probe).cloned());
            }
        }
    }
}
