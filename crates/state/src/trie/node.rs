//! Trie node kinds, their canonical encoding and domain-separated hashing.

use super::nibble::Nibbles;
use basalt_crypto::Blake3Incremental;
use basalt_types::{CodecError, Hash256, Reader, Writer};

/// Domain prefix hashed in front of leaf encodings.
const LEAF_DOMAIN: u8 = 0x00;
/// Domain prefix hashed in front of extension and branch encodings.
const INTERNAL_DOMAIN: u8 = 0x01;

const TAG_LEAF: u8 = 0;
const TAG_EXTENSION: u8 = 1;
const TAG_BRANCH: u8 = 2;

/// Cap on a single trie value; state values are account records and storage
/// slots, both far below this.
const MAX_NODE_VALUE: usize = 1024 * 1024;

/// One node of the Merkle Patricia Trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf {
        path: Nibbles,
        value: Vec<u8>,
    },
    Extension {
        path: Nibbles,
        child: Hash256,
    },
    Branch {
        children: [Option<Hash256>; 16],
        value: Option<Vec<u8>>,
    },
}

impl Node {
    pub fn empty_branch() -> Self {
        Node::Branch {
            children: [None; 16],
            value: None,
        }
    }

    /// Canonical encoding stored in the node store.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Node::Leaf { path, value } => {
                w.put_u8(TAG_LEAF);
                w.put_bytes(&path.encode_compact(true));
                w.put_bytes(value);
            }
            Node::Extension { path, child } => {
                w.put_u8(TAG_EXTENSION);
                w.put_bytes(&path.encode_compact(false));
                w.put_raw(&child.0);
            }
            Node::Branch { children, value } => {
                w.put_u8(TAG_BRANCH);
                let mut bitmap: u16 = 0;
                for (i, child) in children.iter().enumerate() {
                    if child.is_some() {
                        bitmap |= 1 << i;
                    }
                }
                w.put_u16(bitmap);
                for child in children.iter().flatten() {
                    w.put_raw(&child.0);
                }
                match value {
                    Some(v) => {
                        w.put_u8(1);
                        w.put_bytes(v);
                    }
                    None => w.put_u8(0),
                }
            }
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let node = match r.read_u8()? {
            TAG_LEAF => {
                let compact = r.read_bytes_capped(1024)?;
                let (path, is_leaf) = Nibbles::decode_compact(&compact)?;
                if !is_leaf {
                    return Err(CodecError::InvalidValue(
                        "leaf node with extension path flag".into(),
                    ));
                }
                let value = r.read_bytes_capped(MAX_NODE_VALUE)?;
                Node::Leaf { path, value }
            }
            TAG_EXTENSION => {
                let compact = r.read_bytes_capped(1024)?;
                let (path, is_leaf) = Nibbles::decode_compact(&compact)?;
                if is_leaf {
                    return Err(CodecError::InvalidValue(
                        "extension node with leaf path flag".into(),
                    ));
                }
                let child = Hash256(r.read_array::<32>()?);
                Node::Extension { path, child }
            }
            TAG_BRANCH => {
                let bitmap = r.read_u16()?;
                let mut children: [Option<Hash256>; 16] = [None; 16];
                for (i, slot) in children.iter_mut().enumerate() {
                    if bitmap & (1 << i) != 0 {
                        *slot = Some(Hash256(r.read_array::<32>()?));
                    }
                }
                let value = match r.read_u8()? {
                    0 => None,
                    1 => Some(r.read_bytes_capped(MAX_NODE_VALUE)?),
                    other => {
                        return Err(CodecError::InvalidValue(format!(
                            "branch value tag {other}"
                        )))
                    }
                };
                Node::Branch { children, value }
            }
            other => return Err(CodecError::InvalidValue(format!("node tag {other}"))),
        };
        if !r.is_empty() {
            return Err(CodecError::TrailingBytes {
                remaining: r.remaining(),
            });
        }
        Ok(node)
    }

    /// BLAKE3 over the domain prefix and the canonical encoding. The domain
    /// byte keeps a leaf encoding from ever colliding with an internal node
    /// encoding of the same bytes.
    pub fn hash(&self) -> Hash256 {
        let domain = match self {
            Node::Leaf { .. } => LEAF_DOMAIN,
            _ => INTERNAL_DOMAIN,
        };
        let mut hasher = Blake3Incremental::new();
        hasher.update(&[domain]).update(&self.encode());
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_roundtrip() {
        let node = Node::Leaf {
            path: Nibbles::from_key(&[0xde, 0xad]),
            value: vec![1, 2, 3],
        };
        assert_eq!(Node::decode(&node.encode()).unwrap(), node);
    }

    #[test]
    fn branch_roundtrip_sparse_children() {
        let mut children: [Option<Hash256>; 16] = [None; 16];
        children[0] = Some(Hash256([1; 32]));
        children[7] = Some(Hash256([2; 32]));
        children[15] = Some(Hash256([3; 32]));
        let node = Node::Branch {
            children,
            value: Some(vec![9]),
        };
        assert_eq!(Node::decode(&node.encode()).unwrap(), node);
    }

    #[test]
    fn extension_roundtrip() {
        let node = Node::Extension {
            path: Nibbles::from_raw(vec![1, 2, 3]),
            child: Hash256([4; 32]),
        };
        assert_eq!(Node::decode(&node.encode()).unwrap(), node);
    }

    #[test]
    fn leaf_and_internal_hashes_are_domain_separated() {
        // A leaf and an extension that happen to share their encoded bytes
        // except for the tag can never share a hash thanks to the domain
        // prefix; check the simplest observable property instead: same
        // content under both kinds hashes differently.
        let path = Nibbles::from_raw(vec![1, 2]);
        let leaf = Node::Leaf {
            path: path.clone(),
            value: vec![0; 32],
        };
        let ext = Node::Extension {
            path,
            child: Hash256([0; 32]),
        };
        assert_ne!(leaf.hash(), ext.hash());
    }

    #[test]
    fn mismatched_path_flags_are_rejected() {
        let leaf = Node::Leaf {
            path: Nibbles::from_raw(vec![1]),
            value: vec![2],
        };
        let mut bytes = leaf.encode();
        // Rewrite the compact path's leaf flag to extension.
        // Layout: tag(1) || varint len(1) || compact path...
        bytes[2] &= 0x1f;
        assert!(Node::decode(&bytes).is_err());
    }
}
