//! Owning handles over a retained range of a buffer.

use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use skein_core::{fail_fast, Violation};

use crate::leak::LeakTracker;
use crate::memory::{BufferElement, RetainableMemory};

/// One holder of a [`RetainableMemory`], viewing `len` elements from
/// `start`.
///
/// Creating a handle increments the buffer's counter; dropping it
/// decrements, and the last drop disposes the buffer. Cloning and
/// slicing create new holders.
pub struct Retained<T: BufferElement> {
    memory: Arc<RetainableMemory<T>>,
    start: usize,
    len: usize,
    tracking: Option<u64>,
}

impl<T: BufferElement> Retained<T> {
    pub(crate) fn new(
        memory: Arc<RetainableMemory<T>>,
        start: usize,
        len: usize,
        location: &'static Location<'static>,
    ) -> Self {
        memory.increment();
        let tracking = LeakTracker::global().track(location, len, memory.pool_index());
        Self {
            memory,
            start,
            len,
            tracking,
        }
    }

    /// Number of elements in view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the view within the buffer.
    pub fn start(&self) -> usize {
        self.start
    }

    /// The retained buffer.
    pub fn memory(&self) -> &Arc<RetainableMemory<T>> {
        &self.memory
    }

    /// Leak-tracker id of this handle, when tracking is enabled.
    pub fn tracking_id(&self) -> Option<u64> {
        self.tracking
    }

    /// Pointer to the first element in view.
    pub fn as_ptr(&self) -> *mut T {
        // SAFETY: `start <= memory.len()` was checked at retain time and
        // the region stays allocated while this handle holds a count.
        unsafe { self.memory.as_ptr().add(self.start) }
    }

    /// The elements in view.
    ///
    /// # Safety
    ///
    /// No other holder may write to the range while the slice is alive.
    pub unsafe fn as_slice(&self) -> &[T] {
        // SAFETY: in-bounds and live; exclusivity guaranteed by the caller.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// The elements in view, mutably.
    ///
    /// # Safety
    ///
    /// No other holder may read or write the range while the slice is
    /// alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [T] {
        // SAFETY: in-bounds and live; exclusivity guaranteed by the caller.
        unsafe { std::slice::from_raw_parts_mut(self.as_ptr(), self.len) }
    }

    /// A new holder viewing `len` elements from `start`, relative to this
    /// view.
    #[track_caller]
    pub fn slice(&self, start: usize, len: usize) -> Retained<T> {
        if start > self.len || len > self.len - start {
            fail_fast(Violation::RowOutOfBounds {
                index: start.saturating_add(len),
                row_count: self.len,
            });
        }
        Retained::new(
            Arc::clone(&self.memory),
            self.start + start,
            len,
            Location::caller(),
        )
    }
}

impl<T: BufferElement> Clone for Retained<T> {
    #[track_caller]
    fn clone(&self) -> Self {
        Retained::new(
            Arc::clone(&self.memory),
            self.start,
            self.len,
            Location::caller(),
        )
    }
}

impl<T: BufferElement> Drop for Retained<T> {
    fn drop(&mut self) {
        if let Some(id) = self.tracking {
            LeakTracker::global().untrack(id);
        }
        self.memory.decrement();
    }
}

impl<T: BufferElement> fmt::Debug for Retained<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retained")
            .field("start", &self.start)
            .field("len", &self.len)
            .field("memory", &self.memory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_views_subrange_and_counts() {
        let memory = RetainableMemory::<u32>::from_vec((0..32).collect(), false).unwrap();
        let all = memory.retain_all();
        let part = all.slice(4, 8);
        assert_eq!(memory.ref_count(), 2);
        assert_eq!(part.start(), 4);
        // SAFETY: no writers exist.
        let view = unsafe { part.as_slice() };
        assert_eq!(view, &[4, 5, 6, 7, 8, 9, 10, 11]);
        let nested = part.slice(2, 2);
        // SAFETY: no writers exist.
        assert_eq!(unsafe { nested.as_slice() }, &[6, 7]);
        drop(nested);
        drop(part);
        drop(all);
        assert!(memory.is_disposed());
    }

    #[test]
    fn writes_through_mut_slice_are_visible() {
        let memory = RetainableMemory::<u8>::create(16, true).unwrap();
        let handle = memory.retain_all();
        // SAFETY: single holder, no concurrent access.
        unsafe { handle.as_mut_slice()[3] = 42 };
        let pinned = memory.pinned_ptr().unwrap();
        // SAFETY: pinned pointer is valid while retained; index in bounds.
        assert_eq!(unsafe { *pinned.as_ptr().add(3) }, 42);
    }

    #[test]
    fn clone_increments_by_one() {
        let memory = RetainableMemory::<u8>::create(16, false).unwrap();
        let a = memory.retain_all();
        let b = a.clone();
        assert_eq!(memory.ref_count(), 2);
        drop(b);
        assert_eq!(memory.ref_count(), 1);
        drop(a);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn slice_past_end_fails_fast() {
        let memory = RetainableMemory::<u8>::create(16, false).unwrap();
        let all = memory.retain_all();
        let _ = all.slice(10, 10);
    }
}
