//! Chain parameters and genesis description.
//!
//! Every divisor used by the fee market or the epoch schedule is validated
//! non-zero at construction, so downstream arithmetic never has to guard
//! against division by zero.

use crate::primitives::{serde_hex, serde_u256, Address, U256};
use crate::validator::MAX_VALIDATORS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol versions this node can validate.
pub const SUPPORTED_PROTOCOL_VERSIONS: [u16; 1] = [1];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamsError {
    #[error("{0} must be non-zero")]
    ZeroDivisor(&'static str),
    #[error("validator_set_size {got} exceeds the commit bitmap width {max}")]
    SetSizeExceedsBitmap { got: usize, max: usize },
    #[error("{0} must be non-zero")]
    ZeroValue(&'static str),
}

/// Validated, immutable chain parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainParams {
    pub chain_id: u32,
    pub block_gas_limit: u64,
    /// Target utilisation divisor: target gas = gas_limit / elasticity.
    pub base_fee_elasticity: u64,
    /// Per-block base-fee change denominator.
    pub base_fee_change_denominator: u64,
    #[serde(with = "serde_u256")]
    pub initial_base_fee: U256,
    pub epoch_length: u64,
    pub block_time_ms: u64,
    pub validator_set_size: usize,
    #[serde(with = "serde_u256")]
    pub min_validator_stake: U256,
    pub max_pipeline_depth: usize,
    /// Blocks an unbonding entry waits before the stake is released.
    pub unbonding_blocks: u64,
    /// Fraction (in basis points) slashed for inactivity at epoch boundaries.
    pub inactivity_slash_bps: u32,
    /// A validator signing fewer than this fraction (in basis points) of an
    /// epoch's commit bitmaps is slashed for inactivity.
    pub inactivity_threshold_bps: u32,
    pub protocol_version: u16,
}

impl ChainParams {
    /// Validates divisors and structural bounds. The only constructor the
    /// rest of the node is allowed to use.
    pub fn validated(self) -> Result<Self, ParamsError> {
        if self.base_fee_elasticity == 0 {
            return Err(ParamsError::ZeroDivisor("base_fee_elasticity"));
        }
        if self.base_fee_change_denominator == 0 {
            return Err(ParamsError::ZeroDivisor("base_fee_change_denominator"));
        }
        if self.epoch_length == 0 {
            return Err(ParamsError::ZeroDivisor("epoch_length"));
        }
        if self.block_time_ms == 0 {
            return Err(ParamsError::ZeroDivisor("block_time_ms"));
        }
        if self.block_gas_limit == 0 {
            return Err(ParamsError::ZeroValue("block_gas_limit"));
        }
        if self.validator_set_size == 0 {
            return Err(ParamsError::ZeroValue("validator_set_size"));
        }
        if self.validator_set_size > MAX_VALIDATORS {
            return Err(ParamsError::SetSizeExceedsBitmap {
                got: self.validator_set_size,
                max: MAX_VALIDATORS,
            });
        }
        Ok(self)
    }

    /// Target gas per block for the fee-market adjustment.
    pub fn target_gas(&self) -> u64 {
        self.block_gas_limit / self.base_fee_elasticity
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            chain_id: 100,
            block_gas_limit: 30_000_000,
            base_fee_elasticity: 2,
            base_fee_change_denominator: 8,
            initial_base_fee: U256::from(1_000_000_000u64),
            epoch_length: 100,
            block_time_ms: 2_000,
            validator_set_size: MAX_VALIDATORS,
            min_validator_stake: U256::from(1_000u64) * U256::exp10(18),
            max_pipeline_depth: 3,
            unbonding_blocks: 1_000,
            inactivity_slash_bps: 100,
            inactivity_threshold_bps: 5_000,
            protocol_version: 1,
        }
    }
}

/// A funded account at genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    #[serde(with = "serde_hex")]
    pub address: [u8; 20],
    #[serde(with = "serde_u256")]
    pub balance: U256,
}

/// A validator bonded at genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    #[serde(with = "serde_hex")]
    pub address: [u8; 20],
    #[serde(with = "serde_hex")]
    pub ed25519_public_key: [u8; 32],
    #[serde(with = "serde_hex")]
    pub bls_public_key: [u8; 48],
    #[serde(with = "serde_u256")]
    pub stake: U256,
}

/// The genesis description. Its canonical encoding seeds the genesis hash,
/// which the handshake uses to keep nodes of different networks apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub params: ChainParams,
    pub timestamp_ms: u64,
    pub accounts: Vec<GenesisAccount>,
    pub validators: Vec<GenesisValidator>,
}

impl Genesis {
    pub fn account_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.accounts.iter().map(|a| Address(a.address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_validate() {
        assert!(ChainParams::default().validated().is_ok());
    }

    #[test]
    fn zero_divisors_are_rejected() {
        let mut params = ChainParams::default();
        params.base_fee_elasticity = 0;
        assert_eq!(
            params.validated(),
            Err(ParamsError::ZeroDivisor("base_fee_elasticity"))
        );

        let mut params = ChainParams::default();
        params.epoch_length = 0;
        assert!(params.validated().is_err());
    }

    #[test]
    fn set_size_above_bitmap_width_is_rejected_not_truncated() {
        let mut params = ChainParams::default();
        params.validator_set_size = 65;
        assert_eq!(
            params.validated(),
            Err(ParamsError::SetSizeExceedsBitmap { got: 65, max: 64 })
        );
    }

    #[test]
    fn params_toml_roundtrip() {
        let params = ChainParams::default();
        let text = toml::to_string(&params).unwrap();
        let back: ChainParams = toml::from_str(&text).unwrap();
        assert_eq!(params, back);
    }
}
