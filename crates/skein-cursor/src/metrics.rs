//! Awaiter activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of one awaiter's activity since creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AwaiterMetrics {
    /// Waits resolved by the synchronous attempt, without arming.
    pub sync_completions: u64,
    /// Waits resolved by a completion attempt after arming.
    pub async_completions: u64,
    /// Times a continuation was armed.
    pub parks: u64,
    /// Completion requests coalesced into an attempt already in flight.
    pub skipped_updates: u64,
}

#[derive(Debug, Default)]
pub(crate) struct AwaiterCounters {
    pub(crate) sync_completions: AtomicU64,
    pub(crate) async_completions: AtomicU64,
    pub(crate) parks: AtomicU64,
    pub(crate) skipped_updates: AtomicU64,
}

impl AwaiterCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> AwaiterMetrics {
        AwaiterMetrics {
            sync_completions: self.sync_completions.load(Ordering::Relaxed),
            async_completions: self.async_completions.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
            skipped_updates: self.skipped_updates.load(Ordering::Relaxed),
        }
    }
}
