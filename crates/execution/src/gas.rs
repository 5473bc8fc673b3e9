//! Gas schedule and metering.

use basalt_types::{HostFault, Transaction, TxKind};

/// Base cost of any transaction.
pub const TX_BASE_GAS: u64 = 21_000;
/// Extra base cost of a contract deployment.
pub const DEPLOY_BASE_GAS: u64 = 32_000;
/// Per 32-byte word of transaction data.
pub const TX_DATA_WORD_GAS: u64 = 16;
/// Host call costs.
pub const STORAGE_READ_GAS: u64 = 200;
pub const STORAGE_WRITE_GAS: u64 = 5_000;
pub const STORAGE_WRITE_WORD_GAS: u64 = 8;
pub const EVENT_BASE_GAS: u64 = 375;
pub const EVENT_DATA_WORD_GAS: u64 = 8;
pub const TRANSFER_GAS: u64 = 9_000;
pub const CALL_BASE_GAS: u64 = 700;
/// Cost of a staking operation on top of the base transaction gas.
pub const STAKING_OP_GAS: u64 = 10_000;

/// `(len + 31) / 32 * per_word`, computed in u64 so a length near
/// `usize::MAX` cannot overflow the multiply on 32-bit targets.
pub fn word_gas(len: usize, per_word: u64) -> u64 {
    let words = (len as u64).saturating_add(31) / 32;
    words.saturating_mul(per_word)
}

/// Gas charged before any execution, on success and failure alike.
pub fn intrinsic_gas(tx: &Transaction) -> u64 {
    let mut gas = TX_BASE_GAS.saturating_add(word_gas(tx.data.len(), TX_DATA_WORD_GAS));
    match tx.kind {
        TxKind::ContractDeploy => gas = gas.saturating_add(DEPLOY_BASE_GAS),
        TxKind::ValidatorRegister
        | TxKind::ValidatorExit
        | TxKind::StakeDeposit
        | TxKind::StakeWithdraw => gas = gas.saturating_add(STAKING_OP_GAS),
        TxKind::Transfer | TxKind::ContractCall => {}
    }
    gas
}

/// Per-transaction gas meter. Every charge is guarded by
/// `amount > limit − used`, so the check itself can never overflow.
#[derive(Debug, Clone)]
pub struct GasMeter {
    limit: u64,
    used: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    /// Charges `amount`, or consumes everything and reports out-of-gas.
    pub fn charge(&mut self, amount: u64) -> Result<(), HostFault> {
        if amount > self.limit - self.used {
            // Out of gas burns the whole limit.
            self.used = self.limit;
            return Err(HostFault::OutOfGas);
        }
        self.used += amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_gas_rounds_up() {
        assert_eq!(word_gas(0, 16), 0);
        assert_eq!(word_gas(1, 16), 16);
        assert_eq!(word_gas(32, 16), 16);
        assert_eq!(word_gas(33, 16), 32);
    }

    #[test]
    fn charge_guards_without_overflow() {
        let mut meter = GasMeter::new(100);
        assert!(meter.charge(60).is_ok());
        assert!(meter.charge(40).is_ok());
        assert_eq!(meter.remaining(), 0);
        // A further charge of u64::MAX must fail cleanly, not wrap.
        let mut meter = GasMeter::new(100);
        assert_eq!(meter.charge(u64::MAX), Err(HostFault::OutOfGas));
        assert_eq!(meter.used(), 100);
    }

    #[test]
    fn out_of_gas_consumes_the_full_limit() {
        let mut meter = GasMeter::new(50);
        meter.charge(10).unwrap();
        assert_eq!(meter.charge(100), Err(HostFault::OutOfGas));
        assert_eq!(meter.used(), 50);
        assert_eq!(meter.remaining(), 0);
    }
}
