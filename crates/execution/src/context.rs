//! The contract execution context.
//!
//! No process-wide state is involved anywhere: everything a contract can
//! observe — caller, callee, value, block environment, gas, storage, event
//! sink — travels through an explicit context threaded into each call
//! frame. Nested calls get a fresh frame over a child overlay; the parent
//! frame is untouched until the child succeeds and merges back.

use crate::gas::{
    word_gas, GasMeter, CALL_BASE_GAS, EVENT_BASE_GAS, EVENT_DATA_WORD_GAS, STORAGE_READ_GAS,
    STORAGE_WRITE_GAS, STORAGE_WRITE_WORD_GAS, TRANSFER_GAS,
};
use basalt_state::StateAccess;
use basalt_types::{AccountState, Address, Hash256, HostFault, Log, StateError, U256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Hard limit on nested contract calls, enforced here in the engine rather
/// than in any SDK layer.
pub const MAX_CALL_DEPTH: usize = 8;

/// Read-only view of state; implemented by the state databases and by
/// overlays, so frames can stack.
pub trait StateReader {
    fn read_account(&self, address: &Address) -> Result<Option<AccountState>, StateError>;
    fn read_storage(
        &self,
        address: &Address,
        slot: &Hash256,
    ) -> Result<Option<Vec<u8>>, StateError>;
}

impl<S: StateAccess> StateReader for S {
    fn read_account(&self, address: &Address) -> Result<Option<AccountState>, StateError> {
        self.get_account(address)
    }

    fn read_storage(
        &self,
        address: &Address,
        slot: &Hash256,
    ) -> Result<Option<Vec<u8>>, StateError> {
        self.get_storage(address, slot)
    }
}

/// One frame's uncommitted writes over a base view. Dropping the overlay is
/// the discard path; merging it is the commit path.
pub struct StateOverlay<'a> {
    base: &'a dyn StateReader,
    accounts: HashMap<Address, AccountState>,
    storage: HashMap<(Address, Hash256), Vec<u8>>,
    logs: Vec<Log>,
}

impl<'a> StateOverlay<'a> {
    pub fn new(base: &'a dyn StateReader) -> Self {
        Self {
            base,
            accounts: HashMap::new(),
            storage: HashMap::new(),
            logs: Vec::new(),
        }
    }

    pub fn account(&self, address: &Address) -> Result<Option<AccountState>, StateError> {
        if let Some(acc) = self.accounts.get(address) {
            return Ok(Some(acc.clone()));
        }
        self.base.read_account(address)
    }

    pub fn set_account(&mut self, address: Address, account: AccountState) {
        self.accounts.insert(address, account);
    }

    pub fn storage(&self, address: &Address, slot: &Hash256) -> Result<Option<Vec<u8>>, StateError> {
        if let Some(value) = self.storage.get(&(*address, *slot)) {
            return Ok((!value.is_empty()).then(|| value.clone()));
        }
        self.base.read_storage(address, slot)
    }

    pub fn set_storage(&mut self, address: Address, slot: Hash256, value: Vec<u8>) {
        // Empty marks deletion, mirroring the state database convention.
        self.storage.insert((address, slot), value);
    }

    pub fn push_log(&mut self, log: Log) {
        self.logs.push(log);
    }

    /// Decomposes the overlay into its owned parts, ending the borrow of
    /// the base view.
    pub fn into_parts(self) -> OverlayParts {
        OverlayParts {
            accounts: self.accounts,
            storage: self.storage,
            logs: self.logs,
        }
    }

    /// Merges a successful child frame into this frame.
    pub fn merge_child(&mut self, child: OverlayParts) {
        self.accounts.extend(child.accounts);
        self.storage.extend(child.storage);
        self.logs.extend(child.logs);
    }
}

impl StateReader for StateOverlay<'_> {
    fn read_account(&self, address: &Address) -> Result<Option<AccountState>, StateError> {
        self.account(address)
    }

    fn read_storage(
        &self,
        address: &Address,
        slot: &Hash256,
    ) -> Result<Option<Vec<u8>>, StateError> {
        self.storage(address, slot)
    }
}

/// Owned writes of a finished frame.
pub struct OverlayParts {
    pub accounts: HashMap<Address, AccountState>,
    pub storage: HashMap<(Address, Hash256), Vec<u8>>,
    pub logs: Vec<Log>,
}

impl OverlayParts {
    /// Applies the outermost frame's writes onto the real state database.
    pub fn apply<S: StateAccess>(self, state: &mut S) -> Result<Vec<Log>, StateError> {
        for (address, account) in self.accounts {
            state.set_account(address, account)?;
        }
        for ((address, slot), value) in self.storage {
            state.set_storage(address, slot, value)?;
        }
        Ok(self.logs)
    }
}

/// A native contract module invoked through the host interface. The engine
/// itself carries no bytecode VM; modules are registered against the code
/// hash stored in the contract's account.
pub trait ContractModule: Send + Sync {
    fn invoke(&self, host: &mut dyn HostInterface, input: &[u8]) -> Result<Vec<u8>, HostFault>;
}

/// Code-hash keyed registry of contract modules.
#[derive(Default, Clone)]
pub struct ContractRegistry {
    modules: HashMap<Hash256, Arc<dyn ContractModule>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, code_hash: Hash256, module: Arc<dyn ContractModule>) {
        self.modules.insert(code_hash, module);
    }

    pub fn get(&self, code_hash: &Hash256) -> Option<Arc<dyn ContractModule>> {
        self.modules.get(code_hash).cloned()
    }
}

/// What a contract may do, each operation gas-metered. This is the entire
/// sandbox surface.
pub trait HostInterface {
    fn caller(&self) -> Address;
    fn self_address(&self) -> Address;
    fn value(&self) -> U256;
    fn block_height(&self) -> u64;
    fn block_timestamp_ms(&self) -> u64;
    fn gas_remaining(&self) -> u64;
    fn storage_get(&mut self, slot: &Hash256) -> Result<Option<Vec<u8>>, HostFault>;
    fn storage_put(&mut self, slot: Hash256, value: Vec<u8>) -> Result<(), HostFault>;
    fn emit_event(&mut self, topics: Vec<Hash256>, data: Vec<u8>) -> Result<(), HostFault>;
    fn transfer(&mut self, to: Address, amount: U256) -> Result<(), HostFault>;
    fn call_contract(
        &mut self,
        to: Address,
        value: U256,
        input: &[u8],
    ) -> Result<Vec<u8>, HostFault>;
}

/// Per-frame environment; replaced wholesale for every nested call, so a
/// child can never leak its caller/callee/value into the parent.
#[derive(Debug, Clone, Copy)]
pub struct FrameEnv {
    pub caller: Address,
    pub callee: Address,
    pub value: U256,
}

/// Per-block environment shared by every frame of a transaction.
#[derive(Debug, Clone, Copy)]
pub struct BlockEnv {
    pub height: u64,
    pub timestamp_ms: u64,
}

/// The concrete host context for one call frame.
pub struct HostContext<'a, 'base> {
    pub(crate) overlay: StateOverlay<'base>,
    meter: &'a mut GasMeter,
    registry: &'a ContractRegistry,
    /// Addresses currently on the call path; entering one again is
    /// indirect reentrancy (`A → B → A`) and is rejected.
    call_stack: &'a mut Vec<Address>,
    log_index: &'a mut u32,
    env: FrameEnv,
    block: BlockEnv,
    deadline: Instant,
    depth: usize,
}

impl<'a, 'base> HostContext<'a, 'base> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base: &'base dyn StateReader,
        meter: &'a mut GasMeter,
        registry: &'a ContractRegistry,
        call_stack: &'a mut Vec<Address>,
        log_index: &'a mut u32,
        env: FrameEnv,
        block: BlockEnv,
        deadline: Instant,
        depth: usize,
    ) -> Self {
        Self {
            overlay: StateOverlay::new(base),
            meter,
            registry,
            call_stack,
            log_index,
            env,
            block,
            deadline,
            depth,
        }
    }

    /// Moves the frame's call value from caller to callee inside the
    /// overlay, so a failed frame refunds it along with every other write.
    pub fn value_in(&mut self) -> Result<(), HostFault> {
        self.move_value(self.env.caller, self.env.callee, self.env.value)
    }

    fn check_deadline(&self) -> Result<(), HostFault> {
        if Instant::now() >= self.deadline {
            Err(HostFault::Timeout)
        } else {
            Ok(())
        }
    }

    fn move_value(&mut self, from: Address, to: Address, amount: U256) -> Result<(), HostFault> {
        if amount.is_zero() {
            return Ok(());
        }
        let mut sender = self
            .overlay
            .account(&from)
            .map_err(|e| HostFault::Storage(e.to_string()))?
            .ok_or_else(|| HostFault::Transfer(format!("no account {from}")))?;
        sender.balance = sender
            .balance
            .checked_sub(amount)
            .ok_or_else(|| HostFault::Transfer("insufficient balance".into()))?;
        let mut recipient = self
            .overlay
            .account(&to)
            .map_err(|e| HostFault::Storage(e.to_string()))?
            .unwrap_or_default();
        recipient.balance = recipient
            .balance
            .checked_add(amount)
            .ok_or_else(|| HostFault::Transfer("balance overflow".into()))?;
        self.overlay.set_account(from, sender);
        self.overlay.set_account(to, recipient);
        Ok(())
    }
}

impl HostInterface for HostContext<'_, '_> {
    fn caller(&self) -> Address {
        self.env.caller
    }

    fn self_address(&self) -> Address {
        self.env.callee
    }

    fn value(&self) -> U256 {
        self.env.value
    }

    fn block_height(&self) -> u64 {
        self.block.height
    }

    fn block_timestamp_ms(&self) -> u64 {
        self.block.timestamp_ms
    }

    fn gas_remaining(&self) -> u64 {
        self.meter.remaining()
    }

    fn storage_get(&mut self, slot: &Hash256) -> Result<Option<Vec<u8>>, HostFault> {
        self.check_deadline()?;
        self.meter.charge(STORAGE_READ_GAS)?;
        self.overlay
            .storage(&self.env.callee, slot)
            .map_err(|e| HostFault::Storage(e.to_string()))
    }

    fn storage_put(&mut self, slot: Hash256, value: Vec<u8>) -> Result<(), HostFault> {
        self.check_deadline()?;
        self.meter
            .charge(STORAGE_WRITE_GAS.saturating_add(word_gas(value.len(), STORAGE_WRITE_WORD_GAS)))?;
        self.overlay.set_storage(self.env.callee, slot, value);
        Ok(())
    }

    fn emit_event(&mut self, topics: Vec<Hash256>, data: Vec<u8>) -> Result<(), HostFault> {
        self.check_deadline()?;
        self.meter
            .charge(EVENT_BASE_GAS.saturating_add(word_gas(data.len(), EVENT_DATA_WORD_GAS)))?;
        let index = *self.log_index;
        *self.log_index += 1;
        self.overlay.push_log(Log {
            address: self.env.callee,
            topics,
            data,
            index,
        });
        Ok(())
    }

    fn transfer(&mut self, to: Address, amount: U256) -> Result<(), HostFault> {
        self.check_deadline()?;
        self.meter.charge(TRANSFER_GAS)?;
        self.move_value(self.env.callee, to, amount)
    }

    fn call_contract(
        &mut self,
        to: Address,
        value: U256,
        input: &[u8],
    ) -> Result<Vec<u8>, HostFault> {
        self.check_deadline()?;
        self.meter.charge(CALL_BASE_GAS)?;

        if self.depth + 1 > MAX_CALL_DEPTH {
            return Err(HostFault::CallDepthExceeded);
        }
        if self.call_stack.contains(&to) {
            return Err(HostFault::Reentrancy(to));
        }

        let target = self
            .overlay
            .account(&to)
            .map_err(|e| HostFault::Storage(e.to_string()))?
            .ok_or(HostFault::UnknownContract(to))?;
        let module = self
            .registry
            .get(&target.code_hash)
            .ok_or(HostFault::UnknownContract(to))?;

        // Child frame over this frame's overlay; the borrow ends when the
        // child is decomposed, before any merge.
        self.call_stack.push(to);
        let child_result = {
            let mut child = HostContext::new(
                &self.overlay,
                self.meter,
                self.registry,
                self.call_stack,
                self.log_index,
                FrameEnv {
                    caller: self.env.callee,
                    callee: to,
                    value,
                },
                self.block,
                self.deadline,
                self.depth + 1,
            );
            child
                .move_value(self.env.callee, to, value)
                .and_then(|()| module.invoke(&mut child, input))
                .map(|output| (output, child.overlay.into_parts()))
        };
        self.call_stack.pop();

        match child_result {
            Ok((output, parts)) => {
                self.overlay.merge_child(parts);
                Ok(output)
            }
            // Discard the child frame entirely; this frame is untouched.
            Err(fault) => Err(fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_state::InMemoryStateDb;

    /// Calls back into its own caller to provoke the reentrancy guard.
    struct Reenter;
    impl ContractModule for Reenter {
        fn invoke(&self, host: &mut dyn HostInterface, _input: &[u8]) -> Result<Vec<u8>, HostFault> {
            let caller = host.caller();
            host.call_contract(caller, U256::zero(), &[])
        }
    }

    fn state_with_contract(addr: Address, code_hash: Hash256) -> InMemoryStateDb {
        let mut state = InMemoryStateDb::new();
        state
            .set_account(
                addr,
                AccountState {
                    balance: U256::from(1_000u64),
                    code_hash,
                    ..Default::default()
                },
            )
            .unwrap();
        state
    }

    fn far_deadline() -> Instant {
        Instant::now() + std::time::Duration::from_secs(60)
    }

    #[test]
    fn frame_writes_stay_in_overlay_until_merged() {
        let state = state_with_contract(Address([1; 20]), Hash256([9; 32]));
        let registry = ContractRegistry::new();
        let mut meter = GasMeter::new(1_000_000);
        let mut stack = vec![Address([1; 20])];
        let mut log_index = 0u32;

        let mut ctx = HostContext::new(
            &state,
            &mut meter,
            &registry,
            &mut stack,
            &mut log_index,
            FrameEnv {
                caller: Address([2; 20]),
                callee: Address([1; 20]),
                value: U256::zero(),
            },
            BlockEnv {
                height: 1,
                timestamp_ms: 0,
            },
            far_deadline(),
            0,
        );
        ctx.storage_put(Hash256([5; 32]), vec![1]).unwrap();
        assert_eq!(ctx.storage_get(&Hash256([5; 32])).unwrap(), Some(vec![1]));
        // The underlying state never saw the write.
        assert_eq!(
            state.get_storage(&Address([1; 20]), &Hash256([5; 32])).unwrap(),
            None
        );
    }

    #[test]
    fn indirect_reentrancy_is_rejected() {
        let contract_a = Address([0xaa; 20]);
        let contract_b = Address([0xbb; 20]);
        let mut state = state_with_contract(contract_a, Hash256([1; 32]));
        state
            .set_account(
                contract_b,
                AccountState {
                    code_hash: Hash256([2; 32]),
                    ..Default::default()
                },
            )
            .unwrap();

        let mut registry = ContractRegistry::new();
        registry.register(Hash256([1; 32]), Arc::new(Reenter));
        registry.register(Hash256([2; 32]), Arc::new(Reenter));

        let mut meter = GasMeter::new(1_000_000);
        let mut stack = vec![contract_a];
        let mut log_index = 0u32;
        let mut ctx = HostContext::new(
            &state,
            &mut meter,
            &registry,
            &mut stack,
            &mut log_index,
            FrameEnv {
                caller: Address([2; 20]),
                callee: contract_a,
                value: U256::zero(),
            },
            BlockEnv {
                height: 1,
                timestamp_ms: 0,
            },
            far_deadline(),
            0,
        );

        // A → B → A: the inner hop back into A must fail.
        let err = ctx.call_contract(contract_b, U256::zero(), &[]).unwrap_err();
        assert_eq!(err, HostFault::Reentrancy(contract_a));
    }

    #[test]
    fn failed_child_frame_leaves_parent_untouched() {
        let contract = Address([0xaa; 20]);
        let mut state = state_with_contract(contract, Hash256([1; 32]));
        state
            .set_account(
                Address([0xbb; 20]),
                AccountState {
                    code_hash: Hash256([2; 32]),
                    ..Default::default()
                },
            )
            .unwrap();

        struct WriteThenFail;
        impl ContractModule for WriteThenFail {
            fn invoke(
                &self,
                host: &mut dyn HostInterface,
                _input: &[u8],
            ) -> Result<Vec<u8>, HostFault> {
                host.storage_put(Hash256([7; 32]), vec![9])?;
                Err(HostFault::Revert("deliberate".into()))
            }
        }
        let mut registry = ContractRegistry::new();
        registry.register(Hash256([2; 32]), Arc::new(WriteThenFail));

        let mut meter = GasMeter::new(1_000_000);
        let mut stack = vec![contract];
        let mut log_index = 0u32;
        let mut ctx = HostContext::new(
            &state,
            &mut meter,
            &registry,
            &mut stack,
            &mut log_index,
            FrameEnv {
                caller: Address([2; 20]),
                callee: contract,
                value: U256::zero(),
            },
            BlockEnv {
                height: 1,
                timestamp_ms: 0,
            },
            far_deadline(),
            0,
        );

        let err = ctx
            .call_contract(Address([0xbb; 20]), U256::zero(), &[])
            .unwrap_err();
        assert!(matches!(err, HostFault::Revert(_)));
        // The child's storage write was discarded with its frame.
        assert_eq!(
            ctx.overlay.storage(&Address([0xbb; 20]), &Hash256([7; 32])).unwrap(),
            None
        );
        // Gas spent inside the failed frame stays spent.
        assert!(meter.used() > 0);
    }

    #[test]
    fn call_depth_limit_is_enforced_in_the_engine() {
        // A module that calls itself through a second address forever.
        struct Recurse;
        impl ContractModule for Recurse {
            fn invoke(
                &self,
                host: &mut dyn HostInterface,
                _input: &[u8],
            ) -> Result<Vec<u8>, HostFault> {
                let me = host.self_address();
                // Alternate between two addresses to dodge the reentrancy
                // set; depth must still stop the recursion.
                let next = if me == Address([0xaa; 20]) {
                    Address([0xbb; 20])
                } else {
                    Address([0xaa; 20])
                };
                host.call_contract(next, U256::zero(), &[])
            }
        }

        let mut state = state_with_contract(Address([0xaa; 20]), Hash256([1; 32]));
        state
            .set_account(
                Address([0xbb; 20]),
                AccountState {
                    code_hash: Hash256([1; 32]),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut registry = ContractRegistry::new();
        registry.register(Hash256([1; 32]), Arc::new(Recurse));

        let mut meter = GasMeter::new(10_000_000);
        let mut stack = vec![Address([0xaa; 20])];
        let mut log_index = 0u32;
        let mut ctx = HostContext::new(
            &state,
            &mut meter,
            &registry,
            &mut stack,
            &mut log_index,
            FrameEnv {
                caller: Address([2; 20]),
                callee: Address([0xaa; 20]),
                value: U256::zero(),
            },
            BlockEnv {
                height: 1,
                timestamp_ms: 0,
            },
            far_deadline(),
            0,
        );

        let err = ctx
            .call_contract(Address([0xbb; 20]), U256::zero(), &[])
            .unwrap_err();
        // Reentrancy trips first on the A→B→A hop.
        assert!(matches!(
            err,
            HostFault::Reentrancy(_) | HostFault::CallDepthExceeded
        ));
    }
}
