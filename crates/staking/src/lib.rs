//! Validator staking for the Basalt node: registration, delegation, the
//! unbonding queue, slashing, and the epoch lifecycle.

pub mod epoch;
pub mod persistence;
pub mod registry;

pub use epoch::EpochManager;
pub use persistence::RegistrySnapshot;
pub use registry::{
    SlashRecord, StakeInfo, StakingRegistry, StakingService, UnbondingEntry,
};
