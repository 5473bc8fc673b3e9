//! The per-block base-fee schedule.

use basalt_types::{ChainParams, U256};

/// Computes the base fee for the block following a parent that used
/// `parent_gas_used` under `parent_base_fee`.
///
/// Utilisation above target raises the fee, below target lowers it; the
/// per-block movement is bounded by the change denominator. An upward
/// adjustment that rounds to zero still moves by one, so a saturated chain
/// can never stall the fee at a constant value. A downward adjustment that
/// reaches zero resets to the configured initial fee.
pub fn next_base_fee(parent_base_fee: U256, parent_gas_used: u64, params: &ChainParams) -> U256 {
    let target = params.target_gas();
    debug_assert!(target > 0, "ChainParams::validated guarantees a non-zero target");
    if parent_gas_used == target {
        return parent_base_fee;
    }

    let denominator = U256::from(params.base_fee_change_denominator);
    if parent_gas_used > target {
        let excess = U256::from(parent_gas_used - target);
        let delta = parent_base_fee * excess / U256::from(target) / denominator;
        let delta = delta.max(U256::one());
        parent_base_fee.saturating_add(delta)
    } else {
        let shortfall = U256::from(target - parent_gas_used);
        let delta = parent_base_fee * shortfall / U256::from(target) / denominator;
        let next = parent_base_fee.saturating_sub(delta);
        if next.is_zero() {
            params.initial_base_fee
        } else {
            next
        }
    }
}
