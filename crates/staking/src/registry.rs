//! The staking registry.
//!
//! Every mutation — registration, delegation, unstaking, slashing, the
//! unbonding drain — runs inside the registry's single lock, so no
//! interleaving can ever observe a half-applied stake movement. The
//! `delegator → validators` view is derived from the primary map and never
//! independently mutated, which makes reference cycles impossible.

use basalt_execution::StakingHooks;
use basalt_types::{
    Address, BlsPublicKey, Ed25519PublicKey, PeerId, StakingError, U256,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// One validator's stake record.
#[derive(Debug, Clone, Default)]
pub struct StakeInfo {
    pub self_stake: U256,
    pub delegated_stake: U256,
    pub delegators: BTreeMap<Address, U256>,
    pub active: bool,
    /// Consensus identity; populated from genesis or the first
    /// authenticated handshake.
    pub ed25519_public_key: Option<Ed25519PublicKey>,
    pub bls_public_key: Option<BlsPublicKey>,
    pub peer_id: Option<PeerId>,
}

impl StakeInfo {
    pub fn total_stake(&self) -> U256 {
        self.self_stake.saturating_add(self.delegated_stake)
    }
}

/// A queued stake release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnbondingEntry {
    pub validator: Address,
    /// `None` releases self-stake back to the validator.
    pub delegator: Option<Address>,
    pub amount: U256,
    pub completion_block: u64,
}

/// An applied slash, written in the same critical section that moved the
/// stake.
#[derive(Debug, Clone)]
pub struct SlashRecord {
    pub validator: Address,
    pub fraction_bps: u32,
    pub amount: U256,
    pub block_number: u64,
    pub reason: String,
}

struct RegistryInner {
    validators: HashMap<Address, StakeInfo>,
    /// Completion-block sorted queue.
    unbonding: BTreeMap<u64, Vec<UnbondingEntry>>,
    slash_history: Vec<SlashRecord>,
}

pub struct StakingRegistry {
    min_validator_stake: U256,
    unbonding_blocks: u64,
    inner: Mutex<RegistryInner>,
}

impl StakingRegistry {
    pub fn new(min_validator_stake: U256, unbonding_blocks: u64) -> Arc<Self> {
        Arc::new(Self {
            min_validator_stake,
            unbonding_blocks,
            inner: Mutex::new(RegistryInner {
                validators: HashMap::new(),
                unbonding: BTreeMap::new(),
                slash_history: Vec::new(),
            }),
        })
    }

    pub fn register_validator(&self, address: Address, amount: U256) -> Result<(), StakingError> {
        if amount < self.min_validator_stake {
            return Err(StakingError::BelowMinimumStake {
                minimum: self.min_validator_stake.to_string(),
                got: amount.to_string(),
            });
        }
        let mut inner = self.inner.lock();
        if inner.validators.contains_key(&address) {
            return Err(StakingError::AlreadyRegistered(address));
        }
        inner.validators.insert(
            address,
            StakeInfo {
                self_stake: amount,
                active: true,
                ..Default::default()
            },
        );
        info!(target: "staking", validator = %address, stake = %amount, "validator registered");
        Ok(())
    }

    pub fn add_stake(&self, address: Address, amount: U256) -> Result<(), StakingError> {
        let mut inner = self.inner.lock();
        let validator = inner
            .validators
            .get_mut(&address)
            .ok_or(StakingError::UnknownValidator(address))?;
        validator.self_stake = validator
            .self_stake
            .checked_add(amount)
            .ok_or(StakingError::Overflow)?;
        validator.active = validator.self_stake >= self.min_validator_stake;
        Ok(())
    }

    /// Queues an unstake. A full unstake deactivates the validator; a
    /// partial one that would fall below the minimum is rejected.
    pub fn initiate_unstake(
        &self,
        address: Address,
        amount: U256,
        current_block: u64,
    ) -> Result<(), StakingError> {
        let mut inner = self.inner.lock();
        let validator = inner
            .validators
            .get_mut(&address)
            .ok_or(StakingError::UnknownValidator(address))?;
        if amount > validator.self_stake {
            return Err(StakingError::InsufficientSelfStake);
        }
        let remainder = validator.self_stake - amount;
        if !remainder.is_zero() && remainder < self.min_validator_stake {
            return Err(StakingError::RemainderBelowMinimum);
        }
        validator.self_stake = remainder;
        if remainder.is_zero() {
            validator.active = false;
        }
        let completion_block = current_block + self.unbonding_blocks;
        inner
            .unbonding
            .entry(completion_block)
            .or_default()
            .push(UnbondingEntry {
                validator: address,
                delegator: None,
                amount,
                completion_block,
            });
        Ok(())
    }

    /// Full validator exit: queue the entire self-stake and deactivate, in
    /// one critical section.
    pub fn initiate_exit(&self, address: Address, current_block: u64) -> Result<(), StakingError> {
        let mut inner = self.inner.lock();
        let validator = inner
            .validators
            .get_mut(&address)
            .ok_or(StakingError::UnknownValidator(address))?;
        let amount = validator.self_stake;
        validator.self_stake = U256::zero();
        validator.active = false;
        let completion_block = current_block + self.unbonding_blocks;
        inner
            .unbonding
            .entry(completion_block)
            .or_default()
            .push(UnbondingEntry {
                validator: address,
                delegator: None,
                amount,
                completion_block,
            });
        Ok(())
    }

    pub fn delegate(
        &self,
        delegator: Address,
        validator: Address,
        amount: U256,
    ) -> Result<(), StakingError> {
        let mut inner = self.inner.lock();
        let target = inner
            .validators
            .get_mut(&validator)
            .ok_or(StakingError::UnknownValidator(validator))?;
        if !target.active {
            return Err(StakingError::InactiveValidator(validator));
        }
        let entry = target.delegators.entry(delegator).or_insert(U256::zero());
        *entry = entry.checked_add(amount).ok_or(StakingError::Overflow)?;
        target.delegated_stake = target
            .delegated_stake
            .checked_add(amount)
            .ok_or(StakingError::Overflow)?;
        Ok(())
    }

    /// Queues the release of delegated stake.
    pub fn undelegate(
        &self,
        delegator: Address,
        validator: Address,
        amount: U256,
        current_block: u64,
    ) -> Result<(), StakingError> {
        let mut inner = self.inner.lock();
        let target = inner
            .validators
            .get_mut(&validator)
            .ok_or(StakingError::UnknownValidator(validator))?;
        let held = target
            .delegators
            .get(&delegator)
            .copied()
            .unwrap_or_default();
        if amount > held {
            return Err(StakingError::InsufficientDelegation);
        }
        let remaining = held - amount;
        if remaining.is_zero() {
            target.delegators.remove(&delegator);
        } else {
            target.delegators.insert(delegator, remaining);
        }
        target.delegated_stake = target.delegated_stake.saturating_sub(amount);
        let completion_block = current_block + self.unbonding_blocks;
        inner
            .unbonding
            .entry(completion_block)
            .or_default()
            .push(UnbondingEntry {
                validator,
                delegator: Some(delegator),
                amount,
                completion_block,
            });
        Ok(())
    }

    /// Drains every unbonding entry whose completion block has passed, in
    /// one pass over the sorted queue.
    pub fn process_unbonding(&self, current_block: u64) -> Vec<UnbondingEntry> {
        let mut inner = self.inner.lock();
        let mut completed = Vec::new();
        let due: Vec<u64> = inner
            .unbonding
            .range(..=current_block)
            .map(|(block, _)| *block)
            .collect();
        for block in due {
            if let Some(entries) = inner.unbonding.remove(&block) {
                completed.extend(entries);
            }
        }
        completed
    }

    /// Slashes `fraction_bps` basis points of the validator's total stake,
    /// capped at the total. Self-stake absorbs the penalty first, then
    /// delegations pro-rata. History is written in the same critical
    /// section.
    pub fn apply_slash(
        &self,
        address: Address,
        fraction_bps: u32,
        block_number: u64,
        reason: &str,
    ) -> Result<U256, StakingError> {
        let mut inner = self.inner.lock();
        let validator = inner
            .validators
            .get_mut(&address)
            .ok_or(StakingError::UnknownValidator(address))?;

        let total = validator.total_stake();
        let mut amount = total * U256::from(fraction_bps.min(10_000)) / U256::from(10_000u64);
        amount = amount.min(total);

        let from_self = amount.min(validator.self_stake);
        validator.self_stake -= from_self;
        let mut from_delegated = amount - from_self;
        if !from_delegated.is_zero() && !validator.delegated_stake.is_zero() {
            let pool = validator.delegated_stake;
            from_delegated = from_delegated.min(pool);
            // Pro-rata across delegators; the invariant total = self +
            // sum(delegators) is restored at the end.
            let mut removed = U256::zero();
            let delegators: Vec<Address> = validator.delegators.keys().copied().collect();
            for delegator in delegators {
                let held = validator.delegators[&delegator];
                let cut = held * from_delegated / pool;
                let remaining = held - cut;
                removed = removed.saturating_add(cut);
                if remaining.is_zero() {
                    validator.delegators.remove(&delegator);
                } else {
                    validator.delegators.insert(delegator, remaining);
                }
            }
            validator.delegated_stake = validator.delegated_stake.saturating_sub(removed);
        }
        validator.active = validator.self_stake >= self.min_validator_stake;

        warn!(
            target: "staking",
            validator = %address,
            fraction_bps,
            amount = %amount,
            reason,
            "slash applied"
        );
        inner.slash_history.push(SlashRecord {
            validator: address,
            fraction_bps,
            amount,
            block_number,
            reason: reason.to_string(),
        });
        Ok(amount)
    }

    /// Installs the consensus identity learned from genesis or the first
    /// authenticated handshake.
    pub fn set_consensus_keys(
        &self,
        address: Address,
        ed25519: Ed25519PublicKey,
        bls: BlsPublicKey,
        peer_id: PeerId,
    ) -> Result<(), StakingError> {
        let mut inner = self.inner.lock();
        let validator = inner
            .validators
            .get_mut(&address)
            .ok_or(StakingError::UnknownValidator(address))?;
        validator.ed25519_public_key = Some(ed25519);
        validator.bls_public_key = Some(bls);
        validator.peer_id = Some(peer_id);
        Ok(())
    }

    pub fn stake_info(&self, address: &Address) -> Option<StakeInfo> {
        self.inner.lock().validators.get(address).cloned()
    }

    pub fn slash_history(&self) -> Vec<SlashRecord> {
        self.inner.lock().slash_history.clone()
    }

    /// Active validators sorted by (stake descending, address ascending).
    pub fn active_validators(&self) -> Vec<(Address, StakeInfo)> {
        let inner = self.inner.lock();
        let mut out: Vec<(Address, StakeInfo)> = inner
            .validators
            .iter()
            .filter(|(_, info)| info.active && info.self_stake >= self.min_validator_stake)
            .map(|(addr, info)| (*addr, info.clone()))
            .collect();
        out.sort_by(|a, b| {
            b.1.total_stake()
                .cmp(&a.1.total_stake())
                .then_with(|| a.0.cmp(&b.0))
        });
        out
    }

    /// Every validator record, sorted by address for deterministic
    /// snapshots.
    pub(crate) fn export_validators(&self) -> Vec<(Address, StakeInfo)> {
        let inner = self.inner.lock();
        let mut out: Vec<(Address, StakeInfo)> = inner
            .validators
            .iter()
            .map(|(addr, info)| (*addr, info.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// The unbonding queue in completion-block order.
    pub(crate) fn export_unbonding(&self) -> Vec<UnbondingEntry> {
        let inner = self.inner.lock();
        inner.unbonding.values().flatten().cloned().collect()
    }

    /// Replaces registry contents wholesale (snapshot restore).
    pub(crate) fn import(
        &self,
        validators: Vec<(Address, StakeInfo)>,
        unbonding: Vec<UnbondingEntry>,
    ) {
        let mut inner = self.inner.lock();
        inner.validators = validators.into_iter().collect();
        inner.unbonding.clear();
        for entry in unbonding {
            inner
                .unbonding
                .entry(entry.completion_block)
                .or_default()
                .push(entry);
        }
    }

    /// The derived `delegator → validators` view. Computed on demand from
    /// the primary map.
    pub fn delegations_of(&self, delegator: &Address) -> BTreeSet<Address> {
        let inner = self.inner.lock();
        inner
            .validators
            .iter()
            .filter(|(_, info)| info.delegators.contains_key(delegator))
            .map(|(addr, _)| *addr)
            .collect()
    }
}

/// Bridges the execution engine's staking transactions into the registry.
pub struct StakingService {
    registry: Arc<StakingRegistry>,
}

impl StakingService {
    pub fn new(registry: Arc<StakingRegistry>) -> Self {
        Self { registry }
    }
}

impl StakingHooks for StakingService {
    fn register(&mut self, validator: Address, amount: U256) -> Result<(), StakingError> {
        self.registry.register_validator(validator, amount)
    }

    fn exit(&mut self, validator: Address, current_block: u64) -> Result<(), StakingError> {
        self.registry.initiate_exit(validator, current_block)
    }

    fn deposit(&mut self, validator: Address, amount: U256) -> Result<(), StakingError> {
        self.registry.add_stake(validator, amount)
    }

    fn withdraw(
        &mut self,
        validator: Address,
        amount: U256,
        current_block: u64,
    ) -> Result<(), StakingError> {
        self.registry.initiate_unstake(validator, amount, current_block)
    }
}
