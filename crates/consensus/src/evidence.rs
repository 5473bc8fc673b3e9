//! Double-sign detection.
//!
//! Tracks the block hash each proposer announced for `(view, height)` over
//! a short sliding window. Two distinct hashes under one key are
//! cryptographically attributable equivocation and feed a full slash.

use basalt_types::{Address, Hash256};
use std::collections::HashMap;

/// How many views back the window reaches.
const EVIDENCE_WINDOW_VIEWS: u64 = 10;

/// Slashable proof that a proposer signed two blocks for one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivocationEvidence {
    pub proposer: Address,
    pub view: u64,
    pub block_number: u64,
    pub first_hash: Hash256,
    pub second_hash: Hash256,
}

#[derive(Default)]
pub struct EquivocationTracker {
    seen: HashMap<(u64, u64, Address), Hash256>,
    highest_view: u64,
}

impl EquivocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a proposal sighting; returns evidence when the proposer
    /// already announced a different hash for the same `(view, height)`.
    pub fn observe(
        &mut self,
        view: u64,
        block_number: u64,
        proposer: Address,
        block_hash: Hash256,
    ) -> Option<EquivocationEvidence> {
        if view > self.highest_view {
            self.highest_view = view;
            let cutoff = self.highest_view.saturating_sub(EVIDENCE_WINDOW_VIEWS);
            self.seen.retain(|(v, _, _), _| *v >= cutoff);
        }

        match self.seen.get(&(view, block_number, proposer)) {
            Some(first) if *first != block_hash => Some(EquivocationEvidence {
                proposer,
                view,
                block_number,
                first_hash: *first,
                second_hash: block_hash,
            }),
            Some(_) => None,
            None => {
                self.seen.insert((view, block_number, proposer), block_hash);
                None
            }
        }
    }

    pub fn tracked(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_hashes_for_one_slot_yield_evidence() {
        let mut tracker = EquivocationTracker::new();
        let proposer = Address([1; 20]);

        assert!(tracker
            .observe(7, 10, proposer, Hash256([0xaa; 32]))
            .is_none());
        // Re-announcing the same hash is benign (gossip duplicates).
        assert!(tracker
            .observe(7, 10, proposer, Hash256([0xaa; 32]))
            .is_none());

        let evidence = tracker
            .observe(7, 10, proposer, Hash256([0xbb; 32]))
            .expect("conflicting hash is evidence");
        assert_eq!(evidence.proposer, proposer);
        assert_eq!(evidence.view, 7);
        assert_eq!(evidence.block_number, 10);
        assert_eq!(evidence.first_hash, Hash256([0xaa; 32]));
        assert_eq!(evidence.second_hash, Hash256([0xbb; 32]));
    }

    #[test]
    fn different_slots_are_independent() {
        let mut tracker = EquivocationTracker::new();
        let proposer = Address([1; 20]);
        assert!(tracker.observe(7, 10, proposer, Hash256([1; 32])).is_none());
        assert!(tracker.observe(8, 10, proposer, Hash256([2; 32])).is_none());
        assert!(tracker.observe(7, 11, proposer, Hash256([3; 32])).is_none());
        assert!(tracker
            .observe(7, 10, Address([2; 20]), Hash256([4; 32]))
            .is_none());
    }

    #[test]
    fn window_slides_with_the_view() {
        let mut tracker = EquivocationTracker::new();
        let proposer = Address([1; 20]);
        tracker.observe(1, 1, proposer, Hash256([1; 32]));
        assert_eq!(tracker.tracked(), 1);

        // Far-future view evicts the stale entry.
        tracker.observe(100, 1, proposer, Hash256([2; 32]));
        assert_eq!(tracker.tracked(), 1);
        // The old slot can no longer produce evidence.
        assert!(tracker.observe(1, 1, proposer, Hash256([9; 32])).is_none());
    }
}
