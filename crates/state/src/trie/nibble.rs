//! Nibble paths and the hex-prefix compact encoding.
//!
//! Compact encoding packs a nibble path into bytes with two flags folded
//! into the first nibble: `0x2` marks a leaf path, `0x1` marks an odd
//! nibble count. An even path wastes the low nibble of the first byte.

use basalt_types::CodecError;

/// An owned sequence of half-bytes (values `0..=15`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Nibbles(Vec<u8>);

impl Nibbles {
    /// Expands a byte key into its nibble path, high nibble first.
    pub fn from_key(key: &[u8]) -> Self {
        let mut out = Vec::with_capacity(key.len() * 2);
        for byte in key {
            out.push(byte >> 4);
            out.push(byte & 0x0f);
        }
        Self(out)
    }

    pub fn from_raw(nibbles: Vec<u8>) -> Self {
        debug_assert!(nibbles.iter().all(|n| *n < 16));
        Self(nibbles)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn at(&self, index: usize) -> u8 {
        self.0[index]
    }

    pub fn slice(&self, from: usize) -> Nibbles {
        Nibbles(self.0[from..].to_vec())
    }

    pub fn slice_to(&self, to: usize) -> Nibbles {
        Nibbles(self.0[..to].to_vec())
    }

    /// Length of the shared prefix with `other`.
    pub fn common_prefix(&self, other: &Nibbles) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// `head` followed by this path.
    pub fn prepend(&self, head: u8) -> Nibbles {
        let mut out = Vec::with_capacity(self.0.len() + 1);
        out.push(head);
        out.extend_from_slice(&self.0);
        Nibbles(out)
    }

    pub fn join(&self, tail: &Nibbles) -> Nibbles {
        let mut out = self.0.clone();
        out.extend_from_slice(&tail.0);
        Nibbles(out)
    }

    /// Hex-prefix encoding with the leaf flag.
    pub fn encode_compact(&self, is_leaf: bool) -> Vec<u8> {
        let odd = self.0.len() % 2 == 1;
        let mut flags = if is_leaf { 0x2u8 } else { 0x0 };
        if odd {
            flags |= 0x1;
        }
        let mut out = Vec::with_capacity(self.0.len() / 2 + 1);
        let mut iter = self.0.iter().copied();
        if odd {
            let first = iter.next().unwrap_or(0);
            out.push(flags << 4 | first);
        } else {
            out.push(flags << 4);
        }
        while let Some(hi) = iter.next() {
            let lo = iter.next().unwrap_or(0);
            out.push(hi << 4 | lo);
        }
        out
    }

    /// Decodes a hex-prefix path, returning the nibbles and the leaf flag.
    pub fn decode_compact(bytes: &[u8]) -> Result<(Nibbles, bool), CodecError> {
        let first = *bytes
            .first()
            .ok_or(CodecError::InvalidValue("empty compact path".into()))?;
        let flags = first >> 4;
        if flags > 0x3 {
            return Err(CodecError::InvalidValue(format!(
                "invalid hex-prefix flags {flags:#x}"
            )));
        }
        let is_leaf = flags & 0x2 != 0;
        let odd = flags & 0x1 != 0;

        let mut nibbles = Vec::with_capacity(bytes.len() * 2);
        if odd {
            nibbles.push(first & 0x0f);
        } else if first & 0x0f != 0 {
            return Err(CodecError::InvalidValue(
                "non-zero padding nibble in even-length path".into(),
            ));
        }
        for byte in &bytes[1..] {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0f);
        }
        Ok((Nibbles(nibbles), is_leaf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_expansion() {
        let n = Nibbles::from_key(&[0xab, 0xcd]);
        assert_eq!(n.len(), 4);
        assert_eq!((n.at(0), n.at(1), n.at(2), n.at(3)), (0xa, 0xb, 0xc, 0xd));
    }

    #[test]
    fn compact_roundtrip_even_and_odd() {
        for (raw, leaf) in [
            (vec![], false),
            (vec![0x1], false),
            (vec![0x1, 0x2], true),
            (vec![0xf, 0x0, 0xa], true),
            (vec![0x0, 0x1, 0x2, 0x3], false),
        ] {
            let n = Nibbles::from_raw(raw);
            let encoded = n.encode_compact(leaf);
            let (decoded, decoded_leaf) = Nibbles::decode_compact(&encoded).unwrap();
            assert_eq!(decoded, n);
            assert_eq!(decoded_leaf, leaf);
        }
    }

    #[test]
    fn compact_flag_bits() {
        // Odd leaf path [0xf]: flags 0b11, first nibble folded in.
        let n = Nibbles::from_raw(vec![0xf]);
        assert_eq!(n.encode_compact(true), vec![0x3f]);
        // Even extension path [0x1, 0x2]: flags 0b00, padding nibble zero.
        let n = Nibbles::from_raw(vec![0x1, 0x2]);
        assert_eq!(n.encode_compact(false), vec![0x00, 0x12]);
    }

    #[test]
    fn malformed_compact_paths_are_rejected(){
        assert!(Nibbles::decode_compact(&[]).is_err());
        // Flag nibble above 0x3.
        assert!(Nibbles::decode_compact(&[0x40]).is_err());
        // Even-length path with dirty padding nibble.
        assert!(Nibbles::decode_compact(&[0x05, 0x12]).is_err());
    }

    #[test]
    fn common_prefix_and_slices() {
        let a = Nibbles::from_raw(vec![1, 2, 3, 4]);
        let b = Nibbles::from_raw(vec![1, 2, 9]);
        assert_eq!(a.common_prefix(&b), 2);
        assert_eq!(a.slice(2), Nibbles::from_raw(vec![3, 4]));
        assert_eq!(a.slice_to(2), Nibbles::from_raw(vec![1, 2]));
        assert_eq!(
            a.slice_to(2).join(&a.slice(2)),
            a
        );
    }
}
