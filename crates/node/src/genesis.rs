//! Genesis construction: the deterministic block 0 and its state.

use basalt_crypto::block_hash;
use basalt_execution::STAKING_ESCROW;
use basalt_staking::StakingRegistry;
use basalt_state::{NodeStore, StateAccess, TrieStateDb};
use basalt_types::{
    AccountState, Address, BlockHeader, BlsPublicKey, Ed25519PublicKey, Genesis, Hash256,
    StateError, ValidatorSet, U256,
};
use std::sync::Arc;

/// Result of materializing a genesis description.
pub struct GenesisState {
    pub header: BlockHeader,
    pub hash: Hash256,
    pub state: TrieStateDb,
    pub registry: Arc<StakingRegistry>,
    pub validator_set: ValidatorSet,
}

/// Builds block 0's state and header from the genesis description.
///
/// Funded accounts receive their balances; validator stakes live in the
/// escrow account and in the staking registry, and the initial validator
/// set is derived exactly like any later epoch rebuild.
pub fn build_genesis(
    genesis: &Genesis,
    base_store: Arc<dyn NodeStore>,
) -> Result<GenesisState, StateError> {
    let mut state = TrieStateDb::open(base_store, Hash256::ZERO);

    for account in &genesis.accounts {
        state.set_account(
            Address(account.address),
            AccountState {
                balance: account.balance,
                ..Default::default()
            },
        )?;
    }

    let registry = StakingRegistry::new(
        genesis.params.min_validator_stake,
        genesis.params.unbonding_blocks,
    );
    let mut escrowed = U256::zero();
    for validator in &genesis.validators {
        let address = Address(validator.address);
        registry
            .register_validator(address, validator.stake)
            .map_err(|e| StateError::Backend(format!("genesis validator: {e}")))?;
        let ed25519 = Ed25519PublicKey(validator.ed25519_public_key);
        registry
            .set_consensus_keys(
                address,
                ed25519,
                BlsPublicKey(validator.bls_public_key),
                basalt_crypto::derive_peer_id(&ed25519),
            )
            .map_err(|e| StateError::Backend(format!("genesis validator keys: {e}")))?;
        escrowed = escrowed.saturating_add(validator.stake);
    }
    if !escrowed.is_zero() {
        state.set_account(
            STAKING_ESCROW,
            AccountState {
                balance: escrowed,
                ..Default::default()
            },
        )?;
    }

    let state_root = state.compute_state_root()?;
    let header = BlockHeader {
        number: 0,
        parent_hash: Hash256::ZERO,
        chain_id: genesis.params.chain_id,
        timestamp_ms: genesis.timestamp_ms,
        state_root,
        tx_root: Hash256::ZERO,
        receipts_root: Hash256::ZERO,
        gas_used: 0,
        gas_limit: genesis.params.block_gas_limit,
        base_fee: genesis.params.initial_base_fee,
        proposer: Address::ZERO,
        extra_data: Vec::new(),
        protocol_version: genesis.params.protocol_version,
    };
    let hash = block_hash(&header);

    let epoch_manager = basalt_staking::EpochManager::new(genesis.params.clone());
    let validator_set = epoch_manager.rebuild_validator_set(0, &registry, &ValidatorSet::default());

    Ok(GenesisState {
        header,
        hash,
        state,
        registry,
        validator_set,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_state::MemoryNodeStore;
    use basalt_types::{ChainParams, GenesisAccount, GenesisValidator};

    fn genesis() -> Genesis {
        let mut params = ChainParams::default();
        params.min_validator_stake = U256::from(100u64);
        Genesis {
            params: params.validated().unwrap(),
            timestamp_ms: 1_000,
            accounts: vec![GenesisAccount {
                address: [0x11; 20],
                balance: U256::from(1_000_000u64),
            }],
            validators: vec![GenesisValidator {
                address: [0x22; 20],
                ed25519_public_key: [0x33; 32],
                bls_public_key: [0x44; 48],
                stake: U256::from(500u64),
            }],
        }
    }

    #[test]
    fn genesis_is_deterministic() {
        let a = build_genesis(&genesis(), MemoryNodeStore::new()).unwrap();
        let b = build_genesis(&genesis(), MemoryNodeStore::new()).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.header.state_root, b.header.state_root);
        assert!(!a.header.state_root.is_zero());
    }

    #[test]
    fn genesis_funds_accounts_and_escrow() {
        let built = build_genesis(&genesis(), MemoryNodeStore::new()).unwrap();
        let funded = built
            .state
            .get_account(&Address([0x11; 20]))
            .unwrap()
            .unwrap();
        assert_eq!(funded.balance, U256::from(1_000_000u64));
        let escrow = built.state.get_account(&STAKING_ESCROW).unwrap().unwrap();
        assert_eq!(escrow.balance, U256::from(500u64));
        assert_eq!(built.validator_set.len(), 1);
        assert_eq!(
            built.validator_set.validators[0].address,
            Address([0x22; 20])
        );
    }
}
