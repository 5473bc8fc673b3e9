//! Canonical snapshot of the staking registry, persisted with every
//! finalized block so a restarting node resumes with identical stake state.

use crate::registry::{StakeInfo, StakingRegistry, UnbondingEntry};
use basalt_types::{
    Address, BlsPublicKey, CodecError, Decode, Ed25519PublicKey, Encode, PeerId, Reader, Writer,
    U256,
};
use std::collections::BTreeMap;

const MAX_SNAPSHOT_VALIDATORS: usize = 4_096;
const MAX_SNAPSHOT_DELEGATORS: usize = 65_536;
const MAX_SNAPSHOT_UNBONDING: usize = 65_536;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorRecord {
    pub address: Address,
    pub self_stake: U256,
    pub delegators: Vec<(Address, U256)>,
    pub active: bool,
    pub ed25519_public_key: Option<Ed25519PublicKey>,
    pub bls_public_key: Option<BlsPublicKey>,
    pub peer_id: Option<PeerId>,
}

impl Encode for ValidatorRecord {
    fn encode(&self, w: &mut Writer) {
        self.address.encode(w);
        self.self_stake.encode(w);
        w.put_varint(self.delegators.len() as u64);
        for (delegator, amount) in &self.delegators {
            delegator.encode(w);
            amount.encode(w);
        }
        self.active.encode(w);
        self.ed25519_public_key.encode(w);
        self.bls_public_key.encode(w);
        self.peer_id.encode(w);
    }
}

impl Decode for ValidatorRecord {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let address = Address::decode(r)?;
        let self_stake = U256::decode(r)?;
        let count = r.read_count_capped(MAX_SNAPSHOT_DELEGATORS)?;
        let mut delegators = Vec::with_capacity(count);
        for _ in 0..count {
            delegators.push((Address::decode(r)?, U256::decode(r)?));
        }
        Ok(Self {
            address,
            self_stake,
            delegators,
            active: bool::decode(r)?,
            ed25519_public_key: Option::<Ed25519PublicKey>::decode(r)?,
            bls_public_key: Option::<BlsPublicKey>::decode(r)?,
            peer_id: Option::<PeerId>::decode(r)?,
        })
    }
}

impl Encode for UnbondingEntry {
    fn encode(&self, w: &mut Writer) {
        self.validator.encode(w);
        self.delegator.encode(w);
        self.amount.encode(w);
        w.put_u64(self.completion_block);
    }
}

impl Decode for UnbondingEntry {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            validator: Address::decode(r)?,
            delegator: Option::<Address>::decode(r)?,
            amount: U256::decode(r)?,
            completion_block: r.read_u64()?,
        })
    }
}

/// The registry's full persisted form, deterministically ordered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrySnapshot {
    pub validators: Vec<ValidatorRecord>,
    pub unbonding: Vec<UnbondingEntry>,
}

impl Encode for RegistrySnapshot {
    fn encode(&self, w: &mut Writer) {
        self.validators.encode(w);
        self.unbonding.encode(w);
    }
}

impl Decode for RegistrySnapshot {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let count = r.read_count_capped(MAX_SNAPSHOT_VALIDATORS)?;
        let mut validators = Vec::with_capacity(count);
        for _ in 0..count {
            validators.push(ValidatorRecord::decode(r)?);
        }
        let count = r.read_count_capped(MAX_SNAPSHOT_UNBONDING)?;
        let mut unbonding = Vec::with_capacity(count);
        for _ in 0..count {
            unbonding.push(UnbondingEntry::decode(r)?);
        }
        Ok(Self {
            validators,
            unbonding,
        })
    }
}

impl StakingRegistry {
    /// Deterministic snapshot of the whole registry.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let validators = self
            .export_validators()
            .into_iter()
            .map(|(address, info)| ValidatorRecord {
                address,
                self_stake: info.self_stake,
                delegators: info.delegators.iter().map(|(a, v)| (*a, *v)).collect(),
                active: info.active,
                ed25519_public_key: info.ed25519_public_key,
                bls_public_key: info.bls_public_key,
                peer_id: info.peer_id,
            })
            .collect();
        RegistrySnapshot {
            validators,
            unbonding: self.export_unbonding(),
        }
    }

    /// Replaces the registry contents with a snapshot's.
    pub fn restore(&self, snapshot: RegistrySnapshot) {
        let validators = snapshot
            .validators
            .into_iter()
            .map(|record| {
                let delegators: BTreeMap<Address, U256> =
                    record.delegators.into_iter().collect();
                let delegated_stake = delegators
                    .values()
                    .fold(U256::zero(), |acc, v| acc.saturating_add(*v));
                (
                    record.address,
                    StakeInfo {
                        self_stake: record.self_stake,
                        delegated_stake,
                        delegators,
                        active: record.active,
                        ed25519_public_key: record.ed25519_public_key,
                        bls_public_key: record.bls_public_key,
                        peer_id: record.peer_id,
                    },
                )
            })
            .collect();
        self.import(validators, snapshot.unbonding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_types::{from_bytes_canonical, to_bytes_canonical};

    #[test]
    fn snapshot_roundtrips_through_the_codec() {
        let registry = StakingRegistry::new(U256::from(100u64), 10);
        registry
            .register_validator(Address([1; 20]), U256::from(500u64))
            .unwrap();
        registry
            .delegate(Address([9; 20]), Address([1; 20]), U256::from(50u64))
            .unwrap();
        registry
            .initiate_unstake(Address([1; 20]), U256::from(200u64), 5)
            .unwrap();

        let snapshot = registry.snapshot();
        let bytes = to_bytes_canonical(&snapshot);
        let decoded = from_bytes_canonical::<RegistrySnapshot>(&bytes).unwrap();
        assert_eq!(decoded, snapshot);

        let restored = StakingRegistry::new(U256::from(100u64), 10);
        restored.restore(decoded);
        let info = restored.stake_info(&Address([1; 20])).unwrap();
        assert_eq!(info.self_stake, U256::from(300u64));
        assert_eq!(info.delegated_stake, U256::from(50u64));
        // The unbonding queue survives too.
        assert_eq!(restored.process_unbonding(100).len(), 1);
    }
}
