//! Acquisition-site leak tracking.
//!
//! Every [`Retained`](crate::Retained) handle created while tracking is
//! enabled records the source location that created it. Dropping the
//! handle removes the record, so whatever remains in
//! [`outstanding`](LeakTracker::outstanding) is a handle that has not been
//! released yet. Tracking is on by default in debug builds and off in
//! release builds.

use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use indexmap::IndexMap;

use crate::memory::PoolIndex;

/// A live acquisition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Acquisition {
    /// Tracker-assigned id, see [`Retained::tracking_id`](crate::Retained::tracking_id).
    pub id: u64,
    /// Where the handle was created.
    pub location: &'static Location<'static>,
    /// Elements in view.
    pub len: usize,
    /// Pool of the retained buffer.
    pub pool_index: PoolIndex,
}

/// Registry of live [`Retained`](crate::Retained) handles.
#[derive(Debug)]
pub struct LeakTracker {
    enabled: AtomicBool,
    next_id: AtomicU64,
    live: Mutex<IndexMap<u64, Acquisition>>,
}

impl LeakTracker {
    /// A tracker, enabled or not.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            next_id: AtomicU64::new(1),
            live: Mutex::new(IndexMap::new()),
        }
    }

    /// The process-wide tracker used by every handle.
    pub fn global() -> &'static LeakTracker {
        static GLOBAL: OnceLock<LeakTracker> = OnceLock::new();
        GLOBAL.get_or_init(|| LeakTracker::new(cfg!(debug_assertions)))
    }

    /// Start recording new acquisitions.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Stop recording new acquisitions. Existing records stay until their
    /// handles drop.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Whether new acquisitions are recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn track(
        &self,
        location: &'static Location<'static>,
        len: usize,
        pool_index: PoolIndex,
    ) -> Option<u64> {
        if !self.is_enabled() {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Acquisition {
                    id,
                    location,
                    len,
                    pool_index,
                },
            );
        Some(id)
    }

    pub(crate) fn untrack(&self, id: u64) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(&id);
    }

    /// Acquisitions not yet released, oldest first.
    pub fn outstanding(&self) -> Vec<Acquisition> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Log every outstanding acquisition at `warn` level and return how
    /// many there were.
    pub fn report_leaks(&self) -> usize {
        let outstanding = self.outstanding();
        for a in &outstanding {
            tracing::warn!(
                id = a.id,
                location = %a.location,
                len = a.len,
                pool = %a.pool_index,
                "retained buffer not released"
            );
        }
        outstanding.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RetainableMemory;

    #[test]
    fn records_and_forgets_acquisition_site() {
        LeakTracker::global().enable();
        let memory = RetainableMemory::<u16>::create(16, false).unwrap();
        let handle = memory.retain_all();
        let id = handle.tracking_id().expect("tracking enabled");
        let live = LeakTracker::global().outstanding();
        let entry = live.iter().find(|a| a.id == id).expect("recorded");
        assert!(entry.location.file().ends_with("leak.rs"));
        assert_eq!(entry.len, 16);
        drop(handle);
        assert!(LeakTracker::global()
            .outstanding()
            .iter()
            .all(|a| a.id != id));
    }

    #[test]
    fn local_tracker_reports() {
        let tracker = LeakTracker::new(true);
        let id = tracker
            .track(Location::caller(), 4, PoolIndex::EXTERNAL)
            .unwrap();
        assert_eq!(tracker.report_leaks(), 1);
        tracker.untrack(id);
        assert_eq!(tracker.report_leaks(), 0);
        tracker.disable();
        assert_eq!(tracker.track(Location::caller(), 4, PoolIndex::EXTERNAL), None);
    }
}
