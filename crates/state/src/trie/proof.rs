//! Merkle proof verification.
//!
//! A witness is the list of encoded nodes along a lookup path, root first.
//! Verification recomputes each node's domain-separated hash and checks the
//! links, so a forged witness can neither change the proven value nor prove
//! absence of a present key.

use super::nibble::Nibbles;
use super::node::Node;
use basalt_types::{Hash256, StateError};

/// Verifies `witness` against `root` for `key`.
///
/// Returns the proven value, `None` when the witness proves the key absent.
/// Any structural inconsistency is an error.
pub fn verify_proof(
    root: Hash256,
    key: &[u8],
    witness: &[Vec<u8>],
) -> Result<Option<Vec<u8>>, StateError> {
    if root.is_zero() {
        return if witness.is_empty() {
            Ok(None)
        } else {
            Err(StateError::InvalidProof { root })
        };
    }
    if witness.is_empty() {
        return Err(StateError::InvalidProof { root });
    }

    let mut expected = root;
    let mut path = Nibbles::from_key(key);
    let mut nodes = witness.iter();

    loop {
        let Some(bytes) = nodes.next() else {
            // The witness ended while a link was still pending.
            return Err(StateError::InvalidProof { root });
        };
        let node = Node::decode(bytes).map_err(|e| StateError::Decode(e.to_string()))?;
        if node.hash() != expected {
            return Err(StateError::InvalidProof { root });
        }

        match node {
            Node::Leaf {
                path: leaf_path,
                value,
            } => {
                return if nodes.next().is_some() {
                    Err(StateError::InvalidProof { root })
                } else if leaf_path == path {
                    Ok(Some(value))
                } else {
                    Ok(None)
                };
            }
            Node::Extension {
                path: ext_path,
                child,
            } => {
                if path.len() < ext_path.len()
                    || path.common_prefix(&ext_path) != ext_path.len()
                {
                    // Path diverges inside the extension: proven absent.
                    return if nodes.next().is_some() {
                        Err(StateError::InvalidProof { root })
                    } else {
                        Ok(None)
                    };
                }
                path = path.slice(ext_path.len());
                expected = child;
            }
            Node::Branch { children, value } => {
                if path.is_empty() {
                    return if nodes.next().is_some() {
                        Err(StateError::InvalidProof { root })
                    } else {
                        Ok(value)
                    };
                }
                match children[path.at(0) as usize] {
                    Some(child) => {
                        path = path.slice(1);
                        expected = child;
                    }
                    None => {
                        return if nodes.next().is_some() {
                            Err(StateError::InvalidProof { root })
                        } else {
                            Ok(None)
                        };
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
    use crate::trie::Trie;

    fn populated_trie() -> Trie {
        let mut trie = Trie::new(MemoryNodeStore::new(), Hash256::ZERO);
        trie.insert(b"doe", b"reindeer".to_vec()).unwrap();
        trie.insert(b"dog", b"puppy".to_vec()).unwrap();
        trie.insert(b"dogglesworth", b"cat".to_vec()).unwrap();
        trie
    }

    #[test]
    fn proves_present_keys() {
        let trie = populated_trie();
        for (key, value) in [
            (&b"doe"[..], &b"reindeer"[..]),
            (b"dog", b"puppy"),
            (b"dogglesworth", b"cat"),
        ] {
            let witness = trie.prove(key).unwrap();
            let proven = verify_proof(trie.root(), key, &witness).unwrap();
            assert_eq!(proven.as_deref(), Some(value));
        }
    }

    #[test]
    fn proves_absent_keys() {
        let trie = populated_trie();
        let witness = trie.prove(b"dodge").unwrap();
        assert_eq!(verify_proof(trie.root(), b"dodge", &witness).unwrap(), None);
    }

    #[test]
    fn tampered_witness_is_rejected() {
        let trie = populated_trie();
        let mut witness = trie.prove(b"dog").unwrap();
        let last = witness.len() - 1;
        // Flip one byte inside the final node's value.
        let len = witness[last].len();
        witness[last][len - 1] ^= 0x01;
        assert!(verify_proof(trie.root(), b"dog", &witness).is_err());
    }

    #[test]
    fn witness_against_wrong_root_is_rejected() {
        let trie = populated_trie();
        let witness = trie.prove(b"dog").unwrap();
        assert!(verify_proof(Hash256([9; 32]), b"dog", &witness).is_err());
    }

    #[test]
    fn truncated_witness_is_rejected() {
        let trie = populated_trie();
        let mut witness = trie.prove(b"dogglesworth").unwrap();
        assert!(witness.len() > 1);
        witness.pop();
        assert!(verify_proof(trie.root(), b"dogglesworth", &witness).is_err());
    }

    #[test]
    fn empty_trie_proves_absence() {
        assert_eq!(verify_proof(Hash256::ZERO, b"any", &[]).unwrap(), None);
    }
}
