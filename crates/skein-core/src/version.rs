//! Container version counters.
//!
//! A container exposes three pieces of synchronization state to readers:
//!
//! - a `version` / `next_version` pair forming a seqlock. A writer bumps
//!   `next_version`, mutates, then bumps `version`. A reader snapshots
//!   `version`, computes, then checks that `next_version` still equals the
//!   snapshot. Any difference means the computation may have seen a torn
//!   state and must be retried.
//! - an `order_version` that only moves when an ordering invariant is
//!   broken (an out-of-order insert). Readers positioned before the bump
//!   must abort, not retry.
//! - a terminal `completed` flag: no more data will ever be appended.
//!
//! The seqlock and the order version are kept as separate counters.

use std::sync::atomic::{self, AtomicBool, AtomicU64, Ordering};

use crate::backoff::Backoff;

/// Synchronization counters shared by a container and its readers.
#[repr(align(128))]
#[derive(Debug, Default)]
pub struct ContainerVersions {
    version: AtomicU64,
    next_version: AtomicU64,
    order_version: AtomicU64,
    completed: AtomicBool,
}

// Compile-time assertion: ContainerVersions must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<ContainerVersions>();
};

impl ContainerVersions {
    /// Counters at zero, not completed.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Reader side ────────────────────────────────────────────────

    /// Snapshot the before-version at the start of an optimistic read.
    pub fn snapshot(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Whether no write started or was in flight since `snapshot` was
    /// taken. Call after all reads of the protected state.
    pub fn validate(&self, snapshot: u64) -> bool {
        atomic::fence(Ordering::Acquire);
        self.next_version.load(Ordering::Relaxed) == snapshot
    }

    /// Current before-version.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Current after-version. Differs from [`version`](Self::version)
    /// only while a write is in flight.
    pub fn next_version(&self) -> u64 {
        self.next_version.load(Ordering::Acquire)
    }

    /// Current order version.
    pub fn order_version(&self) -> u64 {
        self.order_version.load(Ordering::Acquire)
    }

    /// Whether the container will never receive more data.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    // ── Writer side ────────────────────────────────────────────────

    /// Start a structural write. Writers exclude each other: if another
    /// write is in flight this spins until it finishes.
    pub fn begin_write(&self) -> WriteGuard<'_> {
        let mut backoff = Backoff::default();
        loop {
            let current = self.version.load(Ordering::Acquire);
            if self
                .next_version
                .compare_exchange_weak(
                    current,
                    current.wrapping_add(1),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                atomic::fence(Ordering::Release);
                return WriteGuard {
                    versions: self,
                    reordered: false,
                };
            }
            backoff.snooze();
        }
    }

    /// Mark the container as permanently complete.
    pub fn complete(&self) {
        self.completed.store(true, Ordering::Release);
    }
}

/// An in-flight structural write. Dropping it publishes the write by
/// bumping the before-version.
#[must_use = "dropping the guard immediately ends the write"]
pub struct WriteGuard<'a> {
    versions: &'a ContainerVersions,
    reordered: bool,
}

impl WriteGuard<'_> {
    /// Record that this write broke key order. Bumps the order version
    /// once per guard.
    pub fn mark_out_of_order(&mut self) {
        if !self.reordered {
            self.reordered = true;
            self.versions.order_version.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.versions.version.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn snapshot_validates_without_writes() {
        let versions = ContainerVersions::new();
        let v = versions.snapshot();
        assert!(versions.validate(v));
    }

    #[test]
    fn write_in_flight_invalidates_snapshot() {
        let versions = ContainerVersions::new();
        let v = versions.snapshot();
        let guard = versions.begin_write();
        assert!(!versions.validate(v));
        assert_ne!(versions.version(), versions.next_version());
        drop(guard);
        assert!(!versions.validate(v));
        let after = versions.snapshot();
        assert!(versions.validate(after));
        assert_eq!(after, 1);
    }

    #[test]
    fn snapshot_taken_mid_write_never_validates() {
        let versions = ContainerVersions::new();
        let guard = versions.begin_write();
        let v = versions.snapshot();
        assert!(!versions.validate(v));
        drop(guard);
        assert!(!versions.validate(v));
    }

    #[test]
    fn order_version_independent_of_seqlock() {
        let versions = ContainerVersions::new();
        {
            let _guard = versions.begin_write();
        }
        assert_eq!(versions.order_version(), 0);
        {
            let mut guard = versions.begin_write();
            guard.mark_out_of_order();
            guard.mark_out_of_order();
        }
        assert_eq!(versions.order_version(), 1);
        assert_eq!(versions.version(), 2);
    }

    #[test]
    fn complete_is_sticky() {
        let versions = ContainerVersions::new();
        assert!(!versions.is_completed());
        versions.complete();
        assert!(versions.is_completed());
    }

    #[test]
    fn concurrent_writers_exclude_each_other() {
        let versions = Arc::new(ContainerVersions::new());
        let inside = Arc::new(AtomicU64::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let versions = Arc::clone(&versions);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let _guard = versions.begin_write();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(versions.version(), 2000);
        assert_eq!(versions.next_version(), 2000);
    }
}
