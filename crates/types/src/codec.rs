//! The canonical, deterministic binary codec for all consensus-critical data.
//!
//! Centralizing the codec in the base `types` crate guarantees that every
//! component produces the exact same byte representation for the same value,
//! which is what block hashes, signatures and state roots are computed over.
//!
//! Format rules:
//! - Integers are little-endian, fixed width. Big-endian never appears.
//! - Variable lengths use canonical LEB128: non-minimal encodings are
//!   rejected on read, so every value has exactly one valid encoding.
//! - Byte arrays and strings are length-prefixed, and the length is checked
//!   against a hard cap *before* any allocation happens.

use crate::error::CodecError;
use crate::primitives::{
    Address, BlsPublicKey, BlsSignature, Ed25519PublicKey, Ed25519Signature, Hash256, PeerId, U256,
};

/// Hard cap for a single decoded byte array (16 MiB).
pub const MAX_BYTES_LEN: usize = 16 * 1024 * 1024;
/// Hard cap for a single decoded string (4 KiB).
pub const MAX_STRING_LEN: usize = 4 * 1024;
/// Hard cap for a decoded sequence count.
pub const MAX_SEQUENCE_LEN: usize = 65_536;

/// Append-only encoder over an owned buffer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Canonical LEB128.
    pub fn put_varint(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Raw bytes with no length prefix (fixed-width fields).
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Varint length prefix followed by the bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }
}

/// Bounds-checked decoder over a borrowed slice. Never allocates for the
/// input itself; every read is preceded by an explicit `ensure`.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, n: usize) -> Result<(), CodecError> {
        if self.remaining() < n {
            Err(CodecError::UnexpectedEnd {
                needed: n,
                remaining: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.read_array::<2>()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Canonical LEB128. A continuation that ends in a zero byte (other than
    /// a lone zero) is a non-minimal encoding and is rejected, as is anything
    /// that would not fit in 64 bits.
    pub fn read_varint(&mut self) -> Result<u64, CodecError> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        for i in 0..10 {
            self.ensure(1)?;
            let byte = self.buf[self.pos];
            self.pos += 1;
            let part = (byte & 0x7f) as u64;
            if shift == 63 && part > 1 {
                return Err(CodecError::VarIntOverflow);
            }
            value |= part << shift;
            if byte & 0x80 == 0 {
                if i > 0 && byte == 0 {
                    return Err(CodecError::NonMinimalVarInt);
                }
                return Ok(value);
            }
            shift += 7;
        }
        Err(CodecError::VarIntOverflow)
    }

    /// Length-prefixed bytes, capped at `max` before allocation.
    pub fn read_bytes_capped(&mut self, max: usize) -> Result<Vec<u8>, CodecError> {
        let raw_len = self.read_varint()?;
        // The decoded length must fit the platform index type before any
        // cast, and must respect the cap before any allocation.
        let len = usize::try_from(raw_len).map_err(|_| CodecError::OversizedLength {
            len: raw_len,
            max: max as u64,
        })?;
        if len > max {
            return Err(CodecError::OversizedLength {
                len: len as u64,
                max: max as u64,
            });
        }
        self.ensure(len)?;
        let out = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        self.read_bytes_capped(MAX_BYTES_LEN)
    }

    pub fn read_str(&mut self) -> Result<String, CodecError> {
        let raw = self.read_bytes_capped(MAX_STRING_LEN)?;
        String::from_utf8(raw).map_err(|_| CodecError::InvalidValue("non-utf8 string".into()))
    }

    /// Sequence count prefix with a hard cap.
    pub fn read_count_capped(&mut self, max: usize) -> Result<usize, CodecError> {
        let raw_count = self.read_varint()?;
        let count = usize::try_from(raw_count).map_err(|_| CodecError::OversizedLength {
            len: raw_count,
            max: max as u64,
        })?;
        if count > max {
            return Err(CodecError::OversizedLength {
                len: count as u64,
                max: max as u64,
            });
        }
        Ok(count)
    }
}

/// A value with a single canonical byte representation.
pub trait Encode {
    fn encode(&self, w: &mut Writer);
}

/// Decoding counterpart of [`Encode`]. Fails fast on malformed input.
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError>;
}

/// Encodes a value into its canonical byte representation.
pub fn to_bytes_canonical<T: Encode>(v: &T) -> Vec<u8> {
    let mut w = Writer::new();
    v.encode(&mut w);
    w.into_bytes()
}

/// Decodes a value, rejecting trailing bytes so that the mapping between
/// values and encodings stays one-to-one.
pub fn from_bytes_canonical<T: Decode>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut r = Reader::new(bytes);
    let v = T::decode(&mut r)?;
    if !r.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: r.remaining(),
        });
    }
    Ok(v)
}

macro_rules! impl_codec_int {
    ($ty:ty, $put:ident, $read:ident) => {
        impl Encode for $ty {
            fn encode(&self, w: &mut Writer) {
                w.$put(*self);
            }
        }
        impl Decode for $ty {
            fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
                r.$read()
            }
        }
    };
}

// u8 has no standalone Encode impl: `Vec<u8>` is a byte string with its
// own length-prefixed encoding, not a sequence of one-byte items.
impl_codec_int!(u16, put_u16, read_u16);
impl_codec_int!(u32, put_u32, read_u32);
impl_codec_int!(u64, put_u64, read_u64);

impl Encode for bool {
    fn encode(&self, w: &mut Writer) {
        w.put_u8(*self as u8);
    }
}

impl Decode for bool {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        match r.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidValue(format!("bool tag {other}"))),
        }
    }
}

impl Encode for Vec<u8> {
    fn encode(&self, w: &mut Writer) {
        w.put_bytes(self);
    }
}

impl Decode for Vec<u8> {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        r.read_bytes()
    }
}

impl Encode for String {
    fn encode(&self, w: &mut Writer) {
        w.put_str(self);
    }
}

impl Decode for String {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        r.read_str()
    }
}

macro_rules! impl_codec_fixed {
    ($ty:ty, $len:expr) => {
        impl Encode for $ty {
            fn encode(&self, w: &mut Writer) {
                w.put_raw(&self.0);
            }
        }
        impl Decode for $ty {
            fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
                Ok(Self(r.read_array::<$len>()?))
            }
        }
    };
}

impl_codec_fixed!(Hash256, 32);
impl_codec_fixed!(Address, 20);
impl_codec_fixed!(PeerId, 32);
impl_codec_fixed!(Ed25519PublicKey, 32);
impl_codec_fixed!(Ed25519Signature, 64);
impl_codec_fixed!(BlsPublicKey, 48);
impl_codec_fixed!(BlsSignature, 96);

impl Encode for U256 {
    fn encode(&self, w: &mut Writer) {
        let mut buf = [0u8; 32];
        self.to_little_endian(&mut buf);
        w.put_raw(&buf);
    }
}

impl Decode for U256 {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let buf = r.read_array::<32>()?;
        Ok(U256::from_little_endian(&buf))
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, w: &mut Writer) {
        w.put_varint(self.len() as u64);
        for item in self {
            item.encode(w);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let count = r.read_count_capped(MAX_SEQUENCE_LEN)?;
        let mut out = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            out.push(T::decode(r)?);
        }
        Ok(out)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, w: &mut Writer) {
        match self {
            None => w.put_u8(0),
            Some(v) => {
                w.put_u8(1);
                v.encode(w);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        match r.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(r)?)),
            other => Err(CodecError::InvalidValue(format!("option tag {other}"))),
        }
    }
}
