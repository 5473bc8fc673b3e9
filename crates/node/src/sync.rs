//! The pull-sync state machine.
//!
//! At most one batch is in flight, guarded by a compare-and-swap flag. Each
//! request carries a sequence number; only a response echoing the in-flight
//! sequence can complete the wait, so a straggler from an abandoned batch
//! cannot be mistaken for the current one.

use basalt_network::wire::MAX_SYNC_BLOCKS;
use basalt_types::SyncError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// How long a batch may stay in flight before retry.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SyncGuard {
    in_flight: AtomicBool,
    sequence: AtomicU64,
}

impl Default for SyncGuard {
    fn default() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }
}

impl SyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the in-flight slot and allocates the batch sequence.
    /// Fails when a batch is already out.
    pub fn begin(&self, from_number: u64) -> Result<SyncRequestSpec, SyncError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::InFlight);
        }
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(SyncRequestSpec {
            from_number,
            max_blocks: MAX_SYNC_BLOCKS as u32,
            sequence,
        })
    }

    /// Checks a response against the in-flight batch.
    pub fn accept(&self, sequence: u64) -> Result<(), SyncError> {
        if !self.in_flight.load(Ordering::Acquire) {
            return Err(SyncError::SequenceMismatch {
                expected: 0,
                got: sequence,
            });
        }
        let expected = self.sequence.load(Ordering::Acquire);
        if sequence != expected {
            return Err(SyncError::SequenceMismatch {
                expected,
                got: sequence,
            });
        }
        Ok(())
    }

    /// Releases the slot (after success, failure or timeout). The next
    /// `begin` allocates a fresh sequence, orphaning any late response.
    pub fn finish(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// The fields of an outgoing sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequestSpec {
    pub from_number: u64,
    pub max_blocks: u32,
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_batch_in_flight() {
        let guard = SyncGuard::new();
        let spec = guard.begin(5).unwrap();
        assert_eq!(spec.sequence, 1);
        assert!(matches!(guard.begin(5), Err(SyncError::InFlight)));
        guard.finish();
        assert_eq!(guard.begin(5).unwrap().sequence, 2);
    }

    #[test]
    fn stale_responses_are_refused() {
        let guard = SyncGuard::new();
        let first = guard.begin(0).unwrap();
        guard.finish();
        let second = guard.begin(0).unwrap();

        // The first batch's sequence no longer matches.
        assert!(matches!(
            guard.accept(first.sequence),
            Err(SyncError::SequenceMismatch { .. })
        ));
        assert!(guard.accept(second.sequence).is_ok());

        // After completion nothing is accepted.
        guard.finish();
        assert!(guard.accept(second.sequence).is_err());
    }
}
