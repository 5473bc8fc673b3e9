//! Deterministic stake-weighted leader selection.

use basalt_crypto::Blake3Incremental;
use basalt_types::{to_bytes_canonical, Address, ValidatorInfo, ValidatorSet};

/// Reduces a stake to a 64-bit sampling weight.
///
/// All stakes are shifted right by the same amount — just enough for the
/// largest one to fit 64 bits — so proportions survive. A stake below 2^64
/// with `shift == 0` keeps its exact value; realistic 10^18-scale stakes
/// must keep their relative magnitudes rather than all collapsing to a
/// weight of one. A non-zero stake never rounds down to zero weight.
fn sampling_weights(set: &ValidatorSet) -> Vec<u128> {
    let max_bits = set
        .validators
        .iter()
        .map(|v| v.stake.bits())
        .max()
        .unwrap_or(0);
    let shift = max_bits.saturating_sub(64);
    set.validators
        .iter()
        .map(|v| {
            if v.stake.is_zero() {
                0
            } else {
                let scaled = (v.stake >> shift).low_u64();
                u128::from(scaled.max(1))
            }
        })
        .collect()
}

/// Selects the leader for `(block_number, view)` within an epoch's set.
///
/// The draw is seeded by a hash over the round coordinates and the set
/// itself, so every honest node agrees and a new epoch reshuffles the
/// sequence.
pub fn leader_for(set: &ValidatorSet, block_number: u64, view: u64) -> Option<&ValidatorInfo> {
    if set.is_empty() {
        return None;
    }
    let weights = sampling_weights(set);
    let total: u128 = weights.iter().sum();
    if total == 0 {
        // All stakes zero: fall back to round-robin over the set.
        let index = ((block_number.wrapping_add(view)) % set.len() as u64) as usize;
        return set.validators.get(index);
    }

    let mut hasher = Blake3Incremental::new();
    hasher
        .update(&view.to_le_bytes())
        .update(&block_number.to_le_bytes())
        .update(&set.epoch.to_le_bytes())
        .update(&to_bytes_canonical(set));
    let seed = hasher.finalize();
    let draw = u128::from(u64::from_le_bytes(
        seed.0[..8].try_into().expect("seed is 32 bytes"),
    )) % total;

    let mut cumulative = 0u128;
    for (validator, weight) in set.validators.iter().zip(weights) {
        cumulative += weight;
        if draw < cumulative {
            return Some(validator);
        }
    }
    // The cumulative sum covers the whole draw range.
    unreachable!("draw below total weight")
}

/// True when this node's validator is the leader of the round.
pub fn is_leader(set: &ValidatorSet, block_number: u64, view: u64, address: &Address) -> bool {
    leader_for(set, block_number, view).map(|v| v.address == *address) == Some(true)
}

/// Exposed for tests of the weighting behaviour.
pub fn stake_weight_of(set: &ValidatorSet, index: usize) -> Option<u128> {
    sampling_weights(set).get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_types::{BlsPublicKey, Ed25519PublicKey, PeerId, U256};

    fn set_with_stakes(stakes: &[U256]) -> ValidatorSet {
        let validators = stakes
            .iter()
            .enumerate()
            .map(|(i, stake)| ValidatorInfo {
                peer_id: PeerId([i as u8; 32]),
                ed25519_public_key: Ed25519PublicKey([i as u8; 32]),
                bls_public_key: BlsPublicKey([i as u8; 48]),
                address: Address([i as u8 + 1; 20]),
                index: i as u32,
                stake: *stake,
            })
            .collect();
        ValidatorSet::new(3, validators)
    }

    #[test]
    fn selection_is_deterministic() {
        let set = set_with_stakes(&[
            U256::from(100u64),
            U256::from(200u64),
            U256::from(300u64),
        ]);
        for view in 0..50 {
            assert_eq!(
                leader_for(&set, 7, view).unwrap().address,
                leader_for(&set, 7, view).unwrap().address
            );
        }
    }

    #[test]
    fn small_stakes_keep_their_proportions() {
        // Stakes under 2^64 map to their exact values, never all to 1.
        let set = set_with_stakes(&[U256::from(1u64), U256::from(1_000_000u64)]);
        assert_eq!(stake_weight_of(&set, 0), Some(1));
        assert_eq!(stake_weight_of(&set, 1), Some(1_000_000));
    }

    #[test]
    fn realistic_stakes_select_proportionally() {
        // 100e18 / 200e18 / 300e18 / 400e18: expect roughly 10/20/30/40%.
        let unit = U256::exp10(18);
        let set = set_with_stakes(&[
            U256::from(100u64) * unit,
            U256::from(200u64) * unit,
            U256::from(300u64) * unit,
            U256::from(400u64) * unit,
        ]);

        let mut counts = [0usize; 4];
        let rounds = 10_000u64;
        for view in 0..rounds {
            let leader = leader_for(&set, 1, view).unwrap();
            counts[leader.index as usize] += 1;
        }

        // Loose statistical bounds: each share within ±5 percentage points.
        let share = |i: usize| counts[i] as f64 / rounds as f64;
        assert!((share(0) - 0.10).abs() < 0.05, "share0 = {}", share(0));
        assert!((share(1) - 0.20).abs() < 0.05, "share1 = {}", share(1));
        assert!((share(2) - 0.30).abs() < 0.05, "share2 = {}", share(2));
        assert!((share(3) - 0.40).abs() < 0.05, "share3 = {}", share(3));
        // The 4x staker leads strictly more often than the 1x staker.
        assert!(counts[3] > counts[0]);
    }

    #[test]
    fn zero_stake_sets_fall_back_to_round_robin() {
        let set = set_with_stakes(&[U256::zero(), U256::zero(), U256::zero()]);
        let mut seen = std::collections::HashSet::new();
        for view in 0..3 {
            seen.insert(leader_for(&set, 0, view).unwrap().index);
        }
        assert_eq!(seen.len(), 3);
    }
}
