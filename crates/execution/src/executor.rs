//! The transaction pipeline: validate, charge, execute, receipt.
//!
//! The ordering rules here are what keep block space honest: intrinsic gas
//! is charged and the nonce advanced before any contract work on every
//! path, so a failing transaction still pays its way. Contract execution
//! runs in an overlay frame that is discarded wholesale on any fault.

use crate::context::{
    BlockEnv, ContractRegistry, FrameEnv, HostContext, OverlayParts, StateReader,
};
use crate::gas::{intrinsic_gas, GasMeter};
use basalt_crypto::{blake3_hash, verify_transaction_signature};
use basalt_state::StateAccess;
use basalt_types::transaction::MAX_TX_DATA;
use basalt_types::{
    AccountState, Address, ChainParams, ComplianceProof, Hash256, HostFault, Log, Receipt,
    StakingError, Transaction, TxError, TxKind, U256,
};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::debug;

/// Wall-clock budget for one transaction's contract execution, enforced
/// around the full dispatch path.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_millis(500);

/// Escrow account holding bonded stake.
pub const STAKING_ESCROW: Address = Address([0xfe; 20]);

/// External zero-knowledge proof verification. The engine only consumes
/// verdicts; proof systems live outside the core.
pub trait ProofVerifier: Send + Sync {
    fn verify(&self, proof: &ComplianceProof) -> bool;
}

/// Development verifier accepting every well-formed proof.
pub struct AllowAllVerifier;

impl ProofVerifier for AllowAllVerifier {
    fn verify(&self, _proof: &ComplianceProof) -> bool {
        true
    }
}

/// Staking operations reachable from transactions. Implemented by the
/// staking registry; the executor only moves the escrowed value and
/// converts errors into failed receipts.
pub trait StakingHooks {
    fn register(&mut self, validator: Address, amount: U256) -> Result<(), StakingError>;
    fn exit(&mut self, validator: Address, current_block: u64) -> Result<(), StakingError>;
    fn deposit(&mut self, validator: Address, amount: U256) -> Result<(), StakingError>;
    fn withdraw(
        &mut self,
        validator: Address,
        amount: U256,
        current_block: u64,
    ) -> Result<(), StakingError>;
}

/// Used where no staking module is wired (pure execution tests).
pub struct NoStaking;

impl StakingHooks for NoStaking {
    fn register(&mut self, validator: Address, _amount: U256) -> Result<(), StakingError> {
        Err(StakingError::UnknownValidator(validator))
    }
    fn exit(&mut self, validator: Address, _current_block: u64) -> Result<(), StakingError> {
        Err(StakingError::UnknownValidator(validator))
    }
    fn deposit(&mut self, validator: Address, _amount: U256) -> Result<(), StakingError> {
        Err(StakingError::UnknownValidator(validator))
    }
    fn withdraw(
        &mut self,
        validator: Address,
        _amount: U256,
        _current_block: u64,
    ) -> Result<(), StakingError> {
        Err(StakingError::UnknownValidator(validator))
    }
}

/// Per-block nullifier set. Cleared at block boundaries; a nullifier enters
/// only after its proof verified.
#[derive(Default)]
pub struct BlockNullifiers {
    seen: HashSet<Hash256>,
}

impl BlockNullifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, nullifier: &Hash256) -> bool {
        self.seen.contains(nullifier)
    }

    pub fn record(&mut self, nullifier: Hash256) {
        self.seen.insert(nullifier);
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Per-block environment for transaction execution.
pub struct TxEnv<'a> {
    pub params: &'a ChainParams,
    pub base_fee: U256,
    pub block: BlockEnv,
    pub proposer: Address,
}

/// The deterministic address of a deployed contract.
pub fn contract_address(sender: &Address, nonce: u64) -> Address {
    let mut preimage = Vec::with_capacity(28);
    preimage.extend_from_slice(&sender.0);
    preimage.extend_from_slice(&nonce.to_le_bytes());
    let digest = blake3_hash(&preimage);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest.0[12..]);
    Address(out)
}

/// Stateless and stateful admission checks, shared by the mempool and the
/// block pipeline. `base_fee` is `None` at mempool admission, where the
/// inclusion fee is not yet known.
pub fn validate_transaction<S: StateAccess>(
    state: &S,
    tx: &Transaction,
    params: &ChainParams,
    base_fee: Option<U256>,
) -> Result<(), TxError> {
    if tx.gas_limit == 0 {
        return Err(TxError::ZeroGasLimit);
    }
    if tx.chain_id != params.chain_id {
        return Err(TxError::ChainIdMismatch {
            expected: params.chain_id,
            got: tx.chain_id,
        });
    }
    if tx.data.len() > MAX_TX_DATA {
        return Err(TxError::DataTooLarge {
            len: tx.data.len(),
            max: MAX_TX_DATA,
        });
    }
    if tx.max_priority_fee_per_gas > tx.max_fee_per_gas {
        return Err(TxError::FeeCapBelowPriority);
    }
    if let Some(base_fee) = base_fee {
        if tx.max_fee_per_gas < base_fee {
            return Err(TxError::FeeBelowBaseFee);
        }
    }
    verify_transaction_signature(tx).map_err(|_| TxError::SignatureInvalid)?;

    let intrinsic = intrinsic_gas(tx);
    if tx.gas_limit < intrinsic {
        return Err(TxError::GasLimitTooLow {
            minimum: intrinsic,
            got: tx.gas_limit,
        });
    }

    let account = state
        .get_account(&tx.sender)
        .map_err(|e| TxError::Internal(e.to_string()))?
        .unwrap_or_default();
    if tx.nonce != account.nonce {
        return Err(TxError::NonceMismatch {
            expected: account.nonce,
            got: tx.nonce,
        });
    }

    let max_gas_cost = U256::from(tx.gas_limit)
        .checked_mul(tx.max_fee_per_gas)
        .ok_or(TxError::Overflow)?;
    let required = tx.value.checked_add(max_gas_cost).ok_or(TxError::Overflow)?;
    if account.balance < required {
        return Err(TxError::InsufficientBalance {
            required: required.to_string(),
            available: account.balance.to_string(),
        });
    }
    Ok(())
}

/// Executes one transaction against `state`.
///
/// `Err` means the transaction was not includable at all (no receipt, no
/// state change). `Ok` with `success = false` means it was included, its
/// gas charged and nonce advanced, but its body failed.
#[allow(clippy::too_many_arguments)]
pub fn execute_transaction<S: StateAccess>(
    state: &mut S,
    tx: &Transaction,
    env: &TxEnv<'_>,
    registry: &ContractRegistry,
    verifier: &dyn ProofVerifier,
    hooks: &mut dyn StakingHooks,
    nullifiers: &mut BlockNullifiers,
    cumulative_gas: u64,
    tx_index: u32,
) -> Result<Receipt, TxError> {
    validate_transaction(state, tx, env.params, Some(env.base_fee))?;

    // Verify every proof before recording any nullifier: a failed
    // verification must never burn one.
    for proof in &tx.compliance_proofs {
        if nullifiers.contains(&proof.nullifier) {
            return Err(TxError::ComplianceProof("nullifier already used".into()));
        }
        if !verifier.verify(proof) {
            return Err(TxError::ComplianceProof("proof verification failed".into()));
        }
    }
    for proof in &tx.compliance_proofs {
        nullifiers.record(proof.nullifier);
    }

    let effective_gas_price = tx
        .effective_gas_price(env.base_fee)
        .ok_or(TxError::Overflow)?;

    // Charge intrinsic gas and advance the nonce FIRST. This sticks on
    // every path, including failed contract execution.
    let mut meter = GasMeter::new(tx.gas_limit);
    meter
        .charge(intrinsic_gas(tx))
        .expect("validated: gas limit covers intrinsic gas");

    let prepaid = U256::from(tx.gas_limit) * effective_gas_price;
    let mut sender = state
        .get_account(&tx.sender)
        .map_err(|e| TxError::Internal(e.to_string()))?
        .unwrap_or_default();
    sender.balance = sender.balance.checked_sub(prepaid).ok_or(TxError::Overflow)?;
    sender.nonce += 1;
    state
        .set_account(tx.sender, sender)
        .map_err(|e| TxError::Internal(e.to_string()))?;

    let outcome = execute_body(state, tx, env, registry, hooks, &mut meter);

    let gas_used = meter.used();
    let (success, logs) = match outcome {
        Ok(logs) => (true, logs),
        Err(fault) => {
            debug!(target: "execution", %fault, sender = %tx.sender, "transaction body failed");
            (false, Vec::new())
        }
    };

    // Refund the unused portion of the prepay; on out-of-gas there is none.
    let refund = U256::from(tx.gas_limit - gas_used) * effective_gas_price;
    if !refund.is_zero() {
        let mut sender = state
            .get_account(&tx.sender)
            .map_err(|e| TxError::Internal(e.to_string()))?
            .unwrap_or_default();
        sender.balance = sender.balance.saturating_add(refund);
        state
            .set_account(tx.sender, sender)
            .map_err(|e| TxError::Internal(e.to_string()))?;
    }

    // The proposer earns the tip over the base fee; the base-fee share is
    // burned.
    let tip_per_gas = effective_gas_price.saturating_sub(env.base_fee);
    let tip = tip_per_gas * U256::from(gas_used);
    if !tip.is_zero() {
        let mut proposer = state
            .get_account(&env.proposer)
            .map_err(|e| TxError::Internal(e.to_string()))?
            .unwrap_or_default();
        proposer.balance = proposer.balance.saturating_add(tip);
        state
            .set_account(env.proposer, proposer)
            .map_err(|e| TxError::Internal(e.to_string()))?;
    }

    Ok(Receipt {
        success,
        gas_used,
        cumulative_gas_used: cumulative_gas + gas_used,
        effective_gas_price,
        // Never computed inside the loop; the block builder backfills it
        // once at end of block.
        post_state_root: Hash256::ZERO,
        logs,
        block_hash: Hash256::ZERO,
        tx_index,
    })
}

fn execute_body<S: StateAccess>(
    state: &mut S,
    tx: &Transaction,
    env: &TxEnv<'_>,
    registry: &ContractRegistry,
    hooks: &mut dyn StakingHooks,
    meter: &mut GasMeter,
) -> Result<Vec<Log>, HostFault> {
    match tx.kind {
        TxKind::Transfer => {
            transfer_on_state(state, &tx.sender, &tx.to, tx.value)?;
            Ok(Vec::new())
        }
        TxKind::ContractDeploy => {
            let target = contract_address(&tx.sender, tx.nonce);
            let existing = state
                .get_account(&target)
                .map_err(|e| HostFault::Storage(e.to_string()))?;
            if existing.is_some_and(|acc| !acc.code_hash.is_zero()) {
                return Err(HostFault::Transfer(format!(
                    "contract already deployed at {target}"
                )));
            }
            let code_hash = blake3_hash(&tx.data);
            state
                .set_account(
                    target,
                    AccountState {
                        balance: U256::zero(),
                        nonce: 0,
                        code_hash,
                        storage_root: Hash256::ZERO,
                    },
                )
                .map_err(|e| HostFault::Storage(e.to_string()))?;
            transfer_on_state(state, &tx.sender, &target, tx.value)?;
            Ok(Vec::new())
        }
        TxKind::ContractCall => run_contract_call(state, tx, env, registry, meter),
        TxKind::ValidatorRegister => {
            // The registry mutation goes first: it can reject, while the
            // escrow transfer cannot fail once validation passed. The
            // reverse order could strand value in escrow on a rejection.
            hooks
                .register(tx.sender, tx.value)
                .map_err(|e| HostFault::Transfer(e.to_string()))?;
            transfer_on_state(state, &tx.sender, &STAKING_ESCROW, tx.value)?;
            Ok(Vec::new())
        }
        TxKind::ValidatorExit => {
            hooks
                .exit(tx.sender, env.block.height)
                .map_err(|e| HostFault::Transfer(e.to_string()))?;
            Ok(Vec::new())
        }
        TxKind::StakeDeposit => {
            hooks
                .deposit(tx.sender, tx.value)
                .map_err(|e| HostFault::Transfer(e.to_string()))?;
            transfer_on_state(state, &tx.sender, &STAKING_ESCROW, tx.value)?;
            Ok(Vec::new())
        }
        TxKind::StakeWithdraw => {
            hooks
                .withdraw(tx.sender, tx.value, env.block.height)
                .map_err(|e| HostFault::Transfer(e.to_string()))?;
            Ok(Vec::new())
        }
    }
}

/// Runs a contract call in an overlay frame; the frame is applied to the
/// state only when the whole call tree succeeded.
fn run_contract_call<S: StateAccess>(
    state: &mut S,
    tx: &Transaction,
    env: &TxEnv<'_>,
    registry: &ContractRegistry,
    meter: &mut GasMeter,
) -> Result<Vec<Log>, HostFault> {
    let target = state
        .get_account(&tx.to)
        .map_err(|e| HostFault::Storage(e.to_string()))?
        .ok_or(HostFault::UnknownContract(tx.to))?;
    let module = registry
        .get(&target.code_hash)
        .ok_or(HostFault::UnknownContract(tx.to))?;

    let mut call_stack = vec![tx.to];
    let mut log_index = 0u32;
    let deadline = Instant::now() + EXECUTION_TIMEOUT;

    let parts: OverlayParts = {
        let reader: &dyn StateReader = state;
        let mut ctx = HostContext::new(
            reader,
            meter,
            registry,
            &mut call_stack,
            &mut log_index,
            FrameEnv {
                caller: tx.sender,
                callee: tx.to,
                value: tx.value,
            },
            env.block,
            deadline,
            0,
        );
        // Move the call value inside the frame so a failure refunds it
        // implicitly with the rest of the discarded overlay.
        ctx.value_in()?;
        module.invoke(&mut ctx, &tx.data)?;
        ctx.overlay.into_parts()
    };

    parts
        .apply(state)
        .map_err(|e| HostFault::Storage(e.to_string()))
}

fn transfer_on_state<S: StateAccess>(
    state: &mut S,
    from: &Address,
    to: &Address,
    amount: U256,
) -> Result<(), HostFault> {
    if amount.is_zero() {
        return Ok(());
    }
    let mut sender = state
        .get_account(from)
        .map_err(|e| HostFault::Storage(e.to_string()))?
        .ok_or_else(|| HostFault::Transfer(format!("no account {from}")))?;
    sender.balance = sender
        .balance
        .checked_sub(amount)
        .ok_or_else(|| HostFault::Transfer("insufficient balance".into()))?;
    let mut recipient = state
        .get_account(to)
        .map_err(|e| HostFault::Storage(e.to_string()))?
        .unwrap_or_default();
    recipient.balance = recipient
        .balance
        .checked_add(amount)
        .ok_or_else(|| HostFault::Transfer("balance overflow".into()))?;
    state
        .set_account(*from, sender)
        .map_err(|e| HostFault::Storage(e.to_string()))?;
    state
        .set_account(*to, recipient)
        .map_err(|e| HostFault::Storage(e.to_string()))?;
    Ok(())
}

/// Executes a full block strictly: the first non-includable transaction
/// aborts with its index. Used when applying received blocks; the builder
/// instead skips rejects before they reach a block.
#[allow(clippy::too_many_arguments)]
pub fn execute_block<S: StateAccess>(
    state: &mut S,
    transactions: &[Transaction],
    env: &TxEnv<'_>,
    registry: &ContractRegistry,
    verifier: &dyn ProofVerifier,
    hooks: &mut dyn StakingHooks,
) -> Result<(Vec<Receipt>, u64), (usize, TxError)> {
    let mut nullifiers = BlockNullifiers::new();
    let mut receipts = Vec::with_capacity(transactions.len());
    let mut cumulative = 0u64;
    for (index, tx) in transactions.iter().enumerate() {
        let receipt = execute_transaction(
            state,
            tx,
            env,
            registry,
            verifier,
            hooks,
            &mut nullifiers,
            cumulative,
            index as u32,
        )
        .map_err(|e| (index, e))?;
        cumulative = receipt.cumulative_gas_used;
        receipts.push(receipt);
    }
    // Block-scoped nullifiers die with the block.
    nullifiers.clear();
    Ok((receipts, cumulative))
}
