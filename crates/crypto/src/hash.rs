//! BLAKE3 and Keccak-256 digests, plus the identity derivations built on
//! them.

use basalt_types::{to_bytes_canonical, Address, BlockHeader, Ed25519PublicKey, Hash256, PeerId};
use tiny_keccak::Hasher as _;

/// One-shot BLAKE3.
pub fn blake3_hash(bytes: &[u8]) -> Hash256 {
    Hash256(*blake3::hash(bytes).as_bytes())
}

/// Incremental BLAKE3. `finalize` consumes the hasher, so feeding data into
/// a disposed hasher is impossible by construction.
#[derive(Default)]
pub struct Blake3Incremental {
    inner: blake3::Hasher,
}

impl Blake3Incremental {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    pub fn finalize(self) -> Hash256 {
        Hash256(*self.inner.finalize().as_bytes())
    }
}

/// Keccak-256 (pre-NIST padding byte `0x01`, rate 136), byte-compatible
/// with the Ethereum flavour.
pub fn keccak256(bytes: &[u8]) -> Hash256 {
    let mut keccak = tiny_keccak::Keccak::v256();
    keccak.update(bytes);
    let mut out = [0u8; 32];
    keccak.finalize(&mut out);
    Hash256(out)
}

/// The last 20 bytes of BLAKE3 over the public key.
pub fn derive_address(public_key: &Ed25519PublicKey) -> Address {
    let digest = blake3_hash(&public_key.0);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest.0[12..]);
    Address(out)
}

/// A node's routing identity: BLAKE3 over its Ed25519 identity key.
pub fn derive_peer_id(public_key: &Ed25519PublicKey) -> PeerId {
    PeerId(blake3_hash(&public_key.0).0)
}

/// A block's identifier: BLAKE3 over the canonical header encoding.
pub fn block_hash(header: &BlockHeader) -> Hash256 {
    blake3_hash(&to_bytes_canonical(header))
}
