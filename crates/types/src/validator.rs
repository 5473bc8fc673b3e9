//! Validator set snapshots and quorum arithmetic.

use crate::codec::{Decode, Encode, Reader, Writer};
use crate::error::CodecError;
use crate::primitives::{Address, BlsPublicKey, Ed25519PublicKey, Hash256, PeerId, U256};

/// Hard upper bound on the validator set size. Commit bitmaps are a single
/// `u64`, so the set can never exceed the bitmap width; `ChainParams`
/// rejects any configuration above this rather than truncating silently.
pub const MAX_VALIDATORS: usize = 64;

/// One validator's identity and weight within an epoch.
///
/// `index` is stable for the whole epoch and is the validator's bit position
/// in commit bitmaps and quorum-certificate signer bitmaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorInfo {
    pub peer_id: PeerId,
    pub ed25519_public_key: Ed25519PublicKey,
    pub bls_public_key: BlsPublicKey,
    pub address: Address,
    pub index: u32,
    pub stake: U256,
}

impl Encode for ValidatorInfo {
    fn encode(&self, w: &mut Writer) {
        self.peer_id.encode(w);
        self.ed25519_public_key.encode(w);
        self.bls_public_key.encode(w);
        self.address.encode(w);
        w.put_u32(self.index);
        self.stake.encode(w);
    }
}

impl Decode for ValidatorInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            peer_id: PeerId::decode(r)?,
            ed25519_public_key: Ed25519PublicKey::decode(r)?,
            bls_public_key: BlsPublicKey::decode(r)?,
            address: Address::decode(r)?,
            index: r.read_u32()?,
            stake: U256::decode(r)?,
        })
    }
}

/// An ordered snapshot of the validators for one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidatorSet {
    pub epoch: u64,
    pub validators: Vec<ValidatorInfo>,
}

impl ValidatorSet {
    pub fn new(epoch: u64, validators: Vec<ValidatorInfo>) -> Self {
        debug_assert!(validators.len() <= MAX_VALIDATORS);
        Self { epoch, validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// `floor(2n/3) + 1` votes are required for a quorum certificate.
    pub fn quorum(&self) -> usize {
        self.validators.len() * 2 / 3 + 1
    }

    /// The largest number of Byzantine validators the set tolerates.
    pub fn max_faults(&self) -> usize {
        self.validators.len().saturating_sub(1) / 3
    }

    pub fn total_stake(&self) -> U256 {
        self.validators
            .iter()
            .fold(U256::zero(), |acc, v| acc.saturating_add(v.stake))
    }

    pub fn by_address(&self, address: &Address) -> Option<&ValidatorInfo> {
        self.validators.iter().find(|v| v.address == *address)
    }

    pub fn by_peer(&self, peer: &PeerId) -> Option<&ValidatorInfo> {
        self.validators.iter().find(|v| v.peer_id == *peer)
    }

    pub fn by_index(&self, index: u32) -> Option<&ValidatorInfo> {
        self.validators.get(index as usize)
    }

    pub fn contains_address(&self, address: &Address) -> bool {
        self.by_address(address).is_some()
    }

    /// Decomposes a signer bitmap into validator references, rejecting bits
    /// beyond the set size.
    pub fn signers_from_bitmap(
        &self,
        bitmap: u64,
    ) -> Result<Vec<&ValidatorInfo>, CodecError> {
        let mut signers = Vec::with_capacity(bitmap.count_ones() as usize);
        for index in 0..64u32 {
            if bitmap & (1u64 << index) == 0 {
                continue;
            }
            match self.by_index(index) {
                Some(v) => signers.push(v),
                None => {
                    return Err(CodecError::InvalidValue(format!(
                        "bitmap bit {index} outside validator set of {}",
                        self.len()
                    )))
                }
            }
        }
        Ok(signers)
    }
}

impl Encode for ValidatorSet {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.epoch);
        self.validators.encode(w);
    }
}

impl Decode for ValidatorSet {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let epoch = r.read_u64()?;
        let count = r.read_count_capped(MAX_VALIDATORS)?;
        let mut validators = Vec::with_capacity(count);
        for _ in 0..count {
            validators.push(ValidatorInfo::decode(r)?);
        }
        Ok(Self { epoch, validators })
    }
}

/// The commit bitmap recorded for one finalized block, kept together with
/// the epoch whose validator indices it refers to. Bitmap indices are
/// meaningless outside that epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRecord {
    pub epoch: u64,
    pub block_number: u64,
    pub bitmap: u64,
}

impl Encode for CommitRecord {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.epoch);
        w.put_u64(self.block_number);
        w.put_u64(self.bitmap);
    }
}

impl Decode for CommitRecord {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            epoch: r.read_u64()?,
            block_number: r.read_u64()?,
            bitmap: r.read_u64()?,
        })
    }
}

/// Placeholder BLS key assigned to a validator that joined the set before
/// completing an authenticated handshake. Such a validator cannot sign
/// consensus messages until the real key replaces the placeholder.
pub fn placeholder_bls_key(address: &Address) -> BlsPublicKey {
    let mut bytes = [0u8; 48];
    bytes[..20].copy_from_slice(&address.0);
    BlsPublicKey(bytes)
}

/// True when the key is still the registration placeholder.
pub fn is_placeholder_bls_key(key: &BlsPublicKey) -> bool {
    key.0[20..] == [0u8; 28] && key.0[..20] != [0u8; 20]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn validator(i: u8) -> ValidatorInfo {
        ValidatorInfo {
            peer_id: PeerId([i; 32]),
            ed25519_public_key: Ed25519PublicKey([i; 32]),
            bls_public_key: BlsPublicKey([i; 48]),
            address: Address([i; 20]),
            index: i as u32,
            stake: U256::from(100u64) * U256::from(i + 1),
        }
    }

    fn set_of(n: usize) -> ValidatorSet {
        ValidatorSet::new(0, (0..n).map(|i| validator(i as u8)).collect())
    }

    #[test]
    fn quorum_of_four_is_three() {
        let set = set_of(4);
        assert_eq!(set.quorum(), 3);
        assert_eq!(set.max_faults(), 1);
    }

    #[test]
    fn bitmap_decomposition_rejects_out_of_range_bits() {
        let set = set_of(4);
        assert_eq!(set.signers_from_bitmap(0b1011).unwrap().len(), 3);
        assert!(set.signers_from_bitmap(1 << 4).is_err());
    }

    #[test]
    fn placeholder_keys_are_recognizable() {
        let addr = Address([0x42; 20]);
        let placeholder = placeholder_bls_key(&addr);
        assert!(is_placeholder_bls_key(&placeholder));
        assert!(!is_placeholder_bls_key(&BlsPublicKey([0x42; 48])));
    }

    #[test]
    fn set_and_commit_record_roundtrip() {
        use crate::codec::{from_bytes_canonical, to_bytes_canonical};
        let set = set_of(3);
        let bytes = to_bytes_canonical(&set);
        assert_eq!(from_bytes_canonical::<ValidatorSet>(&bytes).unwrap(), set);

        let record = CommitRecord {
            epoch: 2,
            block_number: 250,
            bitmap: 0b0110,
        };
        let bytes = to_bytes_canonical(&record);
        assert_eq!(from_bytes_canonical::<CommitRecord>(&bytes).unwrap(), record);
    }

    proptest! {
        /// For any set size the quorum is a strict 2/3 majority and two
        /// quorums always intersect in at least one honest validator.
        #[test]
        fn quorum_math_holds(n in 1usize..=100) {
            let quorum = n * 2 / 3 + 1;
            let max_faults = (n - 1) / 3;
            prop_assert!(quorum * 3 > 2 * n);
            prop_assert!(quorum >= 2 * max_faults + 1);
            prop_assert!(quorum <= n);
        }
    }
}
