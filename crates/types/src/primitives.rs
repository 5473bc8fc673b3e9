//! Fixed-width primitive types shared by every Basalt subsystem.
//!
//! All byte-oriented primitives enforce their length at construction time:
//! there is no way to hold an `Address` or a `BlsSignature` of the wrong
//! size. Comparison and ordering are byte-lexicographic throughout.

use crate::error::CodecError;
use std::fmt;

pub use primitive_types::U256;

/// A 32-byte digest (BLAKE3 unless stated otherwise at the use site).
///
/// The zero digest is a valid sentinel meaning "root of the empty trie" or
/// "no parent block".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let raw = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| CodecError::InvalidValue("malformed hex digest".into()))?;
        Self::try_from(raw.as_slice())
    }
}

impl TryFrom<&[u8]> for Hash256 {
    type Error = CodecError;

    fn try_from(bytes: &[u8]) -> Result<Self, CodecError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CodecError::LengthMismatch {
            expected: 32,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(arr: [u8; 32]) -> Self {
        Self(arr)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256(0x{}..)", hex::encode(&self.0[..4]))
    }
}

/// A 20-byte opaque account identifier, derived from the last 20 bytes of
/// BLAKE3 over the account's public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let raw = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| CodecError::InvalidValue("malformed hex address".into()))?;
        Self::try_from(raw.as_slice())
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = CodecError;

    fn try_from(bytes: &[u8]) -> Result<Self, CodecError> {
        let arr: [u8; 20] = bytes.try_into().map_err(|_| CodecError::LengthMismatch {
            expected: 20,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{}..)", hex::encode(&self.0[..4]))
    }
}

/// A peer identifier, derived from a node's Ed25519 identity key.
///
/// Routing distance between peers is the XOR of their identifiers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// XOR distance to another peer, byte-lexicographically comparable.
    pub fn distance(&self, other: &PeerId) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.0[i] ^ other.0[i];
        }
        out
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = CodecError;

    fn try_from(bytes: &[u8]) -> Result<Self, CodecError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CodecError::LengthMismatch {
            expected: 32,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId(0x{}..)", hex::encode(&self.0[..4]))
    }
}

macro_rules! fixed_key_bytes {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = CodecError;

            fn try_from(bytes: &[u8]) -> Result<Self, CodecError> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| CodecError::LengthMismatch {
                    expected: $len,
                    got: bytes.len(),
                })?;
                Ok(Self(arr))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self([0u8; $len])
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "(0x{}..)"), hex::encode(&self.0[..4]))
            }
        }
    };
}

fixed_key_bytes!(
    /// A 32-byte Ed25519 public key.
    Ed25519PublicKey,
    32
);
fixed_key_bytes!(
    /// A 64-byte Ed25519 signature.
    Ed25519Signature,
    64
);
fixed_key_bytes!(
    /// A 48-byte compressed BLS12-381 G1 public key.
    BlsPublicKey,
    48
);
fixed_key_bytes!(
    /// A 96-byte compressed BLS12-381 G2 signature.
    BlsSignature,
    96
);

/// Serde helpers for decimal-string `U256` fields in config and genesis files.
pub mod serde_u256 {
    use super::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(d)?;
        U256::from_dec_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde helpers for hex-string fixed-byte fields.
pub mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        value: &[u8; N],
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        d: D,
    ) -> Result<[u8; N], D::Error> {
        let raw = String::deserialize(d)?;
        let bytes = hex::decode(raw.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {} bytes", N)))
    }
}
