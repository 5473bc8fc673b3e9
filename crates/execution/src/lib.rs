//! Transaction execution for the Basalt node: the fee-market pipeline, gas
//! metering, and the contract sandbox with explicit execution contexts.

pub mod context;
pub mod executor;
pub mod fees;
pub mod gas;

pub use context::{
    BlockEnv, ContractModule, ContractRegistry, FrameEnv, HostContext, HostInterface,
    StateOverlay, StateReader, MAX_CALL_DEPTH,
};
pub use executor::{
    contract_address, execute_block, execute_transaction, validate_transaction, AllowAllVerifier,
    BlockNullifiers, NoStaking, ProofVerifier, StakingHooks, TxEnv, EXECUTION_TIMEOUT,
    STAKING_ESCROW,
};
pub use fees::next_base_fee;
pub use gas::{intrinsic_gas, word_gas, GasMeter, TX_BASE_GAS};
