//! Epoch lifecycle: boundary detection, validator-set rebuild, and
//! inactivity slashing from commit bitmaps.

use crate::registry::StakingRegistry;
use basalt_types::{
    placeholder_bls_key, Address, ChainParams, CommitRecord, ValidatorInfo, ValidatorSet,
};
use tracing::{info, warn};

pub struct EpochManager {
    params: ChainParams,
}

impl EpochManager {
    pub fn new(params: ChainParams) -> Self {
        Self { params }
    }

    /// The epoch a block number belongs to.
    pub fn epoch_of(&self, block_number: u64) -> u64 {
        block_number / self.params.epoch_length
    }

    /// True exactly at epoch boundaries. Genesis is not a boundary.
    pub fn is_boundary(&self, block_number: u64) -> bool {
        block_number > 0 && block_number % self.params.epoch_length == 0
    }

    /// Rebuilds the validator set for a new epoch from staking state.
    ///
    /// Selection takes the highest-stake active validators up to the
    /// configured cap (which `ChainParams` bounds at the bitmap width);
    /// the chosen set is then ordered by address so indices are stable and
    /// implementation-independent. Peer id and BLS key carry over from the
    /// previous set when the address matches. Validators without a known
    /// BLS key receive a placeholder derived from their address; they
    /// cannot sign consensus until the real key arrives with their first
    /// authenticated handshake.
    pub fn rebuild_validator_set(
        &self,
        epoch: u64,
        registry: &StakingRegistry,
        previous: &ValidatorSet,
    ) -> ValidatorSet {
        let mut chosen = registry.active_validators();
        chosen.truncate(self.params.validator_set_size);
        chosen.sort_by(|a, b| a.0.cmp(&b.0));

        let validators: Vec<ValidatorInfo> = chosen
            .into_iter()
            .enumerate()
            .map(|(index, (address, info))| {
                let carried = previous.by_address(&address);
                let bls_public_key = info
                    .bls_public_key
                    .or_else(|| carried.map(|v| v.bls_public_key))
                    .unwrap_or_else(|| {
                        warn!(
                            target: "epoch",
                            validator = %address,
                            "validator enters set with placeholder BLS key"
                        );
                        placeholder_bls_key(&address)
                    });
                let peer_id = info
                    .peer_id
                    .or_else(|| carried.map(|v| v.peer_id))
                    .unwrap_or_default();
                let ed25519_public_key = info
                    .ed25519_public_key
                    .or_else(|| carried.map(|v| v.ed25519_public_key))
                    .unwrap_or_default();
                ValidatorInfo {
                    peer_id,
                    ed25519_public_key,
                    bls_public_key,
                    address,
                    index: index as u32,
                    stake: info.total_stake(),
                }
            })
            .collect();

        info!(
            target: "epoch",
            epoch,
            validators = validators.len(),
            "validator set rebuilt"
        );
        ValidatorSet::new(epoch, validators)
    }

    /// Computes inactivity slashes for the epoch that just ended.
    ///
    /// Only records stamped with the set's own epoch are counted — bitmap
    /// indices are meaningless under any other validator set.
    pub fn inactivity_slashes(
        &self,
        set: &ValidatorSet,
        records: &[CommitRecord],
    ) -> Vec<Address> {
        let relevant: Vec<&CommitRecord> =
            records.iter().filter(|r| r.epoch == set.epoch).collect();
        if relevant.is_empty() {
            return Vec::new();
        }

        let threshold =
            relevant.len() as u64 * u64::from(self.params.inactivity_threshold_bps) / 10_000;
        let mut slashed = Vec::new();
        for validator in &set.validators {
            let signed = relevant
                .iter()
                .filter(|r| r.bitmap & (1u64 << validator.index) != 0)
                .count() as u64;
            if signed < threshold {
                slashed.push(validator.address);
            }
        }
        slashed
    }

    /// Applies inactivity slashes through the registry; returns the slashed
    /// addresses.
    pub fn apply_inactivity_slashes(
        &self,
        registry: &StakingRegistry,
        set: &ValidatorSet,
        records: &[CommitRecord],
        block_number: u64,
    ) -> Vec<Address> {
        let offenders = self.inactivity_slashes(set, records);
        for address in &offenders {
            // Best effort: a validator that exited mid-epoch has nothing
            // left to slash.
            let _ = registry.apply_slash(
                *address,
                self.params.inactivity_slash_bps,
                block_number,
                "inactivity",
            );
        }
        offenders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_types::{BlsPublicKey, Ed25519PublicKey, U256};

    fn params() -> ChainParams {
        let mut p = ChainParams::default();
        p.epoch_length = 10;
        p.validator_set_size = 4;
        p.min_validator_stake = U256::from(100u64);
        p.validated().unwrap()
    }

    fn registry_with(n: u8) -> std::sync::Arc<StakingRegistry> {
        let reg = StakingRegistry::new(U256::from(100u64), 10);
        for i in 1..=n {
            reg.register_validator(Address([i; 20]), U256::from(100u64 * i as u64))
                .unwrap();
        }
        reg
    }

    #[test]
    fn boundary_detection() {
        let mgr = EpochManager::new(params());
        assert!(!mgr.is_boundary(0));
        assert!(!mgr.is_boundary(9));
        assert!(mgr.is_boundary(10));
        assert!(mgr.is_boundary(20));
        assert_eq!(mgr.epoch_of(9), 0);
        assert_eq!(mgr.epoch_of(10), 1);
    }

    #[test]
    fn rebuild_caps_by_stake_and_orders_by_address() {
        let mgr = EpochManager::new(params());
        let reg = registry_with(6);
        let set = mgr.rebuild_validator_set(1, &reg, &ValidatorSet::default());

        // Validators 3..6 have the most stake; ordering is by address.
        assert_eq!(set.len(), 4);
        let addrs: Vec<u8> = set.validators.iter().map(|v| v.address.0[0]).collect();
        assert_eq!(addrs, vec![3, 4, 5, 6]);
        // Indices are positions within the epoch's ordering.
        for (i, v) in set.validators.iter().enumerate() {
            assert_eq!(v.index, i as u32);
        }
    }

    #[test]
    fn keys_carry_over_from_previous_set() {
        let mgr = EpochManager::new(params());
        let reg = registry_with(2);

        let previous = ValidatorSet::new(
            0,
            vec![ValidatorInfo {
                peer_id: basalt_types::PeerId([9; 32]),
                ed25519_public_key: Ed25519PublicKey([8; 32]),
                bls_public_key: BlsPublicKey([7; 48]),
                address: Address([1; 20]),
                index: 0,
                stake: U256::from(100u64),
            }],
        );

        let set = mgr.rebuild_validator_set(1, &reg, &previous);
        let carried = set.by_address(&Address([1; 20])).unwrap();
        assert_eq!(carried.bls_public_key, BlsPublicKey([7; 48]));
        assert_eq!(carried.peer_id, basalt_types::PeerId([9; 32]));

        // The fresh validator has a recognizable placeholder.
        let fresh = set.by_address(&Address([2; 20])).unwrap();
        assert!(basalt_types::is_placeholder_bls_key(&fresh.bls_public_key));
    }

    #[test]
    fn inactivity_uses_only_matching_epoch_records() {
        let mgr = EpochManager::new(params());
        let reg = registry_with(4);
        let set = mgr.rebuild_validator_set(1, &reg, &ValidatorSet::default());

        // Validator at index 0 signs nothing; the rest sign everything.
        let mut records = Vec::new();
        for block in 10..20 {
            records.push(CommitRecord {
                epoch: 1,
                block_number: block,
                bitmap: 0b1110,
            });
        }
        // A stray record from another epoch would flip the verdict if it
        // were counted.
        records.push(CommitRecord {
            epoch: 0,
            block_number: 9,
            bitmap: 0b0001,
        });

        let offenders = mgr.inactivity_slashes(&set, &records);
        assert_eq!(offenders, vec![set.validators[0].address]);
    }

    #[test]
    fn applied_slashes_reach_the_registry() {
        let mgr = EpochManager::new(params());
        let reg = registry_with(4);
        let set = mgr.rebuild_validator_set(1, &reg, &ValidatorSet::default());
        let before = reg.stake_info(&set.validators[0].address).unwrap().total_stake();

        let records: Vec<CommitRecord> = (10..20)
            .map(|block| CommitRecord {
                epoch: 1,
                block_number: block,
                bitmap: 0b1110,
            })
            .collect();
        let offenders = mgr.apply_inactivity_slashes(&reg, &set, &records, 20);
        assert_eq!(offenders.len(), 1);
        let after = reg.stake_info(&offenders[0]).unwrap().total_stake();
        assert!(after < before);
    }
}
