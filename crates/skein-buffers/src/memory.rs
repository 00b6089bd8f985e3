//! Reference-counted, pool-aware buffers.
//!
//! A [`RetainableMemory`] owns one contiguous region and an explicit
//! [`AtomicCounter`]. The Rust-level allocation is shared through `Arc`;
//! the explicit counter decides when the *region* is recycled:
//!
//! ```text
//! create / rent ──► count 0 ──retain──► count n ──last release──► disposed
//!                                                                  │
//!          pool index 0 (external) ── drop the array ◄─────────────┤
//!          pool index 1 (default)  ── array back to ArrayPool ◄────┤
//!          pool index ≥ 2          ── whole buffer back to its pool┘
//! ```
//!
//! A pinned buffer publishes a raw pointer that stays valid until
//! disposal. Only element types without drop glue can be pinned, since
//! the pointer is shared across holders without any per-element
//! ownership.

use std::cell::UnsafeCell;
use std::fmt;
use std::panic::Location;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use skein_core::{fail_fast, Violation};

use crate::array_pool::ArrayPool;
use crate::counter::AtomicCounter;
use crate::error::BufferError;
use crate::retained::Retained;
use crate::slab::Slab;

/// Element types that can live in pooled buffers.
pub trait BufferElement: Default + Clone + Send + Sync + 'static {}

impl<T: Default + Clone + Send + Sync + 'static> BufferElement for T {}

// ── PoolIndex ──────────────────────────────────────────────────────

/// Identifies who reclaims a buffer's storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolIndex(u32);

impl PoolIndex {
    /// Storage owned by the caller; disposal drops it.
    pub const EXTERNAL: Self = Self(0);
    /// Storage from the process-wide [`ArrayPool`].
    pub const DEFAULT: Self = Self(1);

    /// Allocate a fresh index for a specific pool.
    pub(crate) fn register() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(2);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw index value.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Whether disposal hands the whole buffer back to a specific pool.
    pub fn is_poolable(self) -> bool {
        self.0 >= 2
    }
}

impl fmt::Display for PoolIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

// ── Ownership plumbing ─────────────────────────────────────────────

/// A pool that takes disposed buffers back.
pub(crate) trait ReturnSink<T: BufferElement>: Send + Sync {
    fn take_back(&self, memory: Arc<RetainableMemory<T>>) -> Result<(), Arc<RetainableMemory<T>>>;
}

pub(crate) enum Origin<T: BufferElement> {
    External,
    Default,
    Pool(Weak<dyn ReturnSink<T>>),
}

enum Backing<T> {
    Array(Vec<T>),
    Slice(Arc<Slab<T>>),
    Released,
}

// ── RetainableMemory ───────────────────────────────────────────────

/// A reference-counted buffer.
pub struct RetainableMemory<T: BufferElement> {
    counter: AtomicCounter,
    // Written only while the counter is disposed (exclusive) or in `Drop`.
    backing: UnsafeCell<Backing<T>>,
    base: *mut T,
    len: usize,
    pinned: AtomicPtr<T>,
    pin: bool,
    pool_index: PoolIndex,
    origin: Origin<T>,
    this: Weak<RetainableMemory<T>>,
}

// SAFETY: the raw pointers refer to the owned backing storage, whose
// elements are Send + Sync; mutation of `backing` is serialized by the
// counter's disposed transition.
unsafe impl<T: BufferElement> Send for RetainableMemory<T> {}
// SAFETY: see above.
unsafe impl<T: BufferElement> Sync for RetainableMemory<T> {}

impl<T: BufferElement> RetainableMemory<T> {
    /// A buffer of `length` elements from the default array pool.
    pub fn create(length: usize, pin: bool) -> Result<Arc<Self>, BufferError> {
        check_pinnable::<T>(pin)?;
        let array = ArrayPool::<T>::shared().try_rent(length)?;
        Ok(Self::build(
            Backing::Array(array),
            length,
            pin,
            PoolIndex::DEFAULT,
            Origin::Default,
        ))
    }

    /// Wrap a caller-owned vector. Disposal drops it.
    pub fn from_vec(array: Vec<T>, pin: bool) -> Result<Arc<Self>, BufferError> {
        check_pinnable::<T>(pin)?;
        let len = array.len();
        Ok(Self::build(
            Backing::Array(array),
            len,
            pin,
            PoolIndex::EXTERNAL,
            Origin::External,
        ))
    }

    pub(crate) fn pooled(
        array: Vec<T>,
        pin: bool,
        pool_index: PoolIndex,
        sink: Weak<dyn ReturnSink<T>>,
    ) -> Arc<Self> {
        let len = array.len();
        Self::build(
            Backing::Array(array),
            len,
            pin,
            pool_index,
            Origin::Pool(sink),
        )
    }

    pub(crate) fn slice(
        slab: Arc<Slab<T>>,
        offset: usize,
        len: usize,
        pin: bool,
        pool_index: PoolIndex,
        sink: Weak<dyn ReturnSink<T>>,
    ) -> Arc<Self> {
        let base = slab.element_ptr(offset);
        Self::build_at(
            Backing::Slice(slab),
            base,
            len,
            pin,
            pool_index,
            Origin::Pool(sink),
        )
    }

    fn build(
        mut backing: Backing<T>,
        len: usize,
        pin: bool,
        pool_index: PoolIndex,
        origin: Origin<T>,
    ) -> Arc<Self> {
        let base = match &mut backing {
            Backing::Array(array) => array.as_mut_ptr(),
            _ => ptr::null_mut(),
        };
        Self::build_at(backing, base, len, pin, pool_index, origin)
    }

    fn build_at(
        backing: Backing<T>,
        base: *mut T,
        len: usize,
        pin: bool,
        pool_index: PoolIndex,
        origin: Origin<T>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            counter: AtomicCounter::new(),
            backing: UnsafeCell::new(backing),
            base,
            len,
            pinned: AtomicPtr::new(if pin { base } else { ptr::null_mut() }),
            pin,
            pool_index,
            origin,
            this: this.clone(),
        })
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Length in elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Who reclaims this buffer.
    pub fn pool_index(&self) -> PoolIndex {
        self.pool_index
    }

    /// Whether the buffer was created pinned.
    pub fn is_pinned(&self) -> bool {
        self.pin
    }

    /// The pinned pointer; `None` when not pinned or already disposed.
    pub fn pinned_ptr(&self) -> Option<NonNull<T>> {
        NonNull::new(self.pinned.load(Ordering::Acquire))
    }

    /// Current reference count.
    pub fn ref_count(&self) -> u32 {
        self.counter.count()
    }

    /// Whether at least one holder retains the buffer.
    pub fn is_retained(&self) -> bool {
        self.counter.is_retained()
    }

    /// Whether the buffer has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.counter.is_disposed()
    }

    /// Base pointer of the region. Fails fast after disposal.
    #[track_caller]
    pub fn as_ptr(&self) -> *mut T {
        if self.counter.is_disposed() {
            fail_fast(Violation::UseAfterDispose);
        }
        self.base
    }

    /// The slab this buffer was sliced from, if any.
    #[track_caller]
    pub fn slab(&self) -> Option<Arc<Slab<T>>> {
        if self.counter.is_disposed() {
            fail_fast(Violation::UseAfterDispose);
        }
        // SAFETY: live buffers never have their backing replaced.
        match unsafe { &*self.backing.get() } {
            Backing::Slice(slab) => Some(Arc::clone(slab)),
            _ => None,
        }
    }

    /// Generation of the backing slab, without the disposed check.
    pub(crate) fn slab_generation(&self) -> Option<u64> {
        // SAFETY: `backing` is replaced only by the thread that disposed
        // the buffer, and callers are that thread or hold a count.
        match unsafe { &*self.backing.get() } {
            Backing::Slice(slab) => Some(slab.generation()),
            _ => None,
        }
    }

    // ── Counting ───────────────────────────────────────────────────

    /// Add one holder. Returns the new count.
    #[track_caller]
    pub fn increment(&self) -> u32 {
        self.counter.increment()
    }

    /// Remove one holder, disposing the buffer when the count reaches
    /// zero. Returns the new count.
    #[track_caller]
    pub fn decrement(&self) -> u32 {
        let remaining = self.counter.decrement();
        if remaining == 0 {
            self.dispose();
        }
        remaining
    }

    /// Release the last holder only if there is exactly one. Returns
    /// whether the buffer was disposed.
    #[track_caller]
    pub fn decrement_if_one(&self) -> bool {
        let released = self.counter.decrement_if_one();
        if released {
            self.dispose();
        }
        released
    }

    /// Add a holder only if the buffer is currently retained.
    pub fn increment_if_retained(&self) -> Option<u32> {
        self.counter.increment_if_retained()
    }

    /// Retain `len` elements starting at `start`.
    #[track_caller]
    pub fn retain(self: &Arc<Self>, start: usize, len: usize) -> Retained<T> {
        if start > self.len || len > self.len - start {
            fail_fast(Violation::RowOutOfBounds {
                index: start.saturating_add(len),
                row_count: self.len,
            });
        }
        Retained::new(Arc::clone(self), start, len, Location::caller())
    }

    /// Retain the whole buffer.
    #[track_caller]
    pub fn retain_all(self: &Arc<Self>) -> Retained<T> {
        self.retain(0, self.len)
    }

    /// Dispose a buffer nobody retains. Fails fast when retained or
    /// already disposed.
    #[track_caller]
    pub fn dispose(&self) {
        self.counter.dispose();
        self.release();
    }

    /// Hand the storage to whoever reclaims it. The counter is disposed,
    /// so this thread has exclusive access to `backing`.
    fn release(&self) {
        self.pinned.store(ptr::null_mut(), Ordering::Release);
        match &self.origin {
            Origin::External => {
                // SAFETY: disposed, exclusive access.
                drop(unsafe { self.take_backing() });
            }
            Origin::Default => {
                // SAFETY: disposed, exclusive access.
                if let Backing::Array(array) = unsafe { self.take_backing() } {
                    ArrayPool::<T>::shared().give_back(array);
                }
            }
            Origin::Pool(sink) => {
                let returned = match (sink.upgrade(), self.this.upgrade()) {
                    (Some(sink), Some(this)) => sink.take_back(this).is_ok(),
                    _ => false,
                };
                if !returned {
                    tracing::trace!(pool = %self.pool_index, "pool rejected buffer, releasing storage");
                    // SAFETY: disposed and not pooled, exclusive access.
                    release_backing(unsafe { self.take_backing() });
                }
            }
        }
    }

    /// Bring a pooled buffer back to life with count 0.
    #[track_caller]
    pub(crate) fn revive(&self) {
        self.counter.revive();
        if self.pin {
            self.pinned.store(self.base, Ordering::Release);
        }
    }

    /// # Safety
    ///
    /// Caller must have exclusive access: the counter is disposed and the
    /// buffer is not reachable from any pool.
    unsafe fn take_backing(&self) -> Backing<T> {
        // SAFETY: guaranteed by the caller.
        unsafe { std::mem::replace(&mut *self.backing.get(), Backing::Released) }
    }
}

fn release_backing<T: BufferElement>(backing: Backing<T>) {
    if let Backing::Slice(slab) = backing {
        slab.release();
    }
}

fn check_pinnable<T>(pin: bool) -> Result<(), BufferError> {
    if pin && std::mem::needs_drop::<T>() {
        return Err(BufferError::NotPinnable {
            type_name: std::any::type_name::<T>(),
        });
    }
    Ok(())
}

impl<T: BufferElement> Drop for RetainableMemory<T> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                !self.counter.is_retained(),
                "retainable memory dropped while retained ({} holders)",
                self.counter.count()
            );
        }
        if self.counter.is_retained() {
            tracing::warn!(
                holders = self.counter.count(),
                pool = %self.pool_index,
                "retainable memory dropped while retained"
            );
        }
        let backing = std::mem::replace(self.backing.get_mut(), Backing::Released);
        match (backing, &self.origin) {
            (Backing::Array(array), Origin::Default) => ArrayPool::<T>::shared().give_back(array),
            (backing, _) => release_backing(backing),
        }
    }
}

impl<T: BufferElement> fmt::Debug for RetainableMemory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetainableMemory")
            .field("len", &self.len)
            .field("pool", &self.pool_index)
            .field("count", &self.counter.count())
            .field("disposed", &self.counter.is_disposed())
            .field("pinned", &self.pin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_starts_unretained() {
        let memory = RetainableMemory::<u64>::create(100, true).unwrap();
        assert_eq!(memory.len(), 100);
        assert_eq!(memory.ref_count(), 0);
        assert_eq!(memory.pool_index(), PoolIndex::DEFAULT);
        assert!(memory.pinned_ptr().is_some());
        memory.dispose();
        assert!(memory.is_disposed());
        assert!(memory.pinned_ptr().is_none());
    }

    #[test]
    fn pinning_types_with_drop_glue_is_rejected() {
        let err = RetainableMemory::<String>::create(4, true).unwrap_err();
        assert!(matches!(err, BufferError::NotPinnable { .. }));
        assert!(RetainableMemory::<String>::create(4, false).is_ok());
    }

    #[test]
    fn unpinned_has_no_pinned_pointer() {
        let memory = RetainableMemory::<u8>::from_vec(vec![1, 2, 3], false).unwrap();
        assert!(memory.pinned_ptr().is_none());
        assert_eq!(memory.pool_index(), PoolIndex::EXTERNAL);
        assert!(!memory.as_ptr().is_null());
    }

    #[test]
    fn retain_round_trip_restores_count() {
        let memory = RetainableMemory::<u32>::create(64, false).unwrap();
        memory.increment();
        let before = memory.ref_count();
        let handle = memory.retain(8, 16);
        assert_eq!(memory.ref_count(), before + 1);
        drop(handle);
        assert_eq!(memory.ref_count(), before);
        assert!(!memory.is_disposed());
        memory.decrement();
        assert!(memory.is_disposed());
    }

    #[test]
    fn last_release_disposes_exactly_once() {
        let memory = RetainableMemory::<u32>::create(16, false).unwrap();
        let a = memory.retain_all();
        let b = a.clone();
        drop(a);
        assert!(!memory.is_disposed());
        drop(b);
        assert!(memory.is_disposed());
    }

    #[test]
    #[should_panic(expected = "use after dispose")]
    fn decrement_after_dispose_fails_fast() {
        let memory = RetainableMemory::<u32>::create(16, false).unwrap();
        memory.increment();
        memory.decrement();
        memory.decrement();
    }

    #[test]
    #[should_panic(expected = "use after dispose")]
    fn pointer_after_dispose_fails_fast() {
        let memory = RetainableMemory::<u32>::create(16, false).unwrap();
        memory.dispose();
        let _ = memory.as_ptr();
    }

    #[test]
    #[should_panic(expected = "disposed while still retained")]
    fn dispose_while_retained_fails_fast() {
        let memory = RetainableMemory::<u32>::create(16, false).unwrap();
        let _handle = memory.retain_all();
        memory.dispose();
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn retain_out_of_range_fails_fast() {
        let memory = RetainableMemory::<u32>::from_vec(vec![0; 8], false).unwrap();
        let _ = memory.retain(4, 5);
    }

    #[test]
    fn decrement_if_one_only_releases_last_holder() {
        let memory = RetainableMemory::<u8>::create(16, false).unwrap();
        memory.increment();
        memory.increment();
        assert!(!memory.decrement_if_one());
        memory.decrement();
        assert!(memory.decrement_if_one());
        assert!(memory.is_disposed());
    }

    #[test]
    fn increment_if_retained_respects_state() {
        let memory = RetainableMemory::<u8>::create(16, false).unwrap();
        assert_eq!(memory.increment_if_retained(), None);
        let handle = memory.retain_all();
        assert_eq!(memory.increment_if_retained(), Some(2));
        memory.decrement();
        drop(handle);
        assert!(memory.is_disposed());
    }

    #[test]
    fn default_pool_reuses_array_after_dispose() {
        let pool = ArrayPool::<u128>::shared();
        let memory = RetainableMemory::<u128>::create(4096, false).unwrap();
        let ptr = memory.as_ptr();
        let handle = memory.retain_all();
        drop(handle);
        assert!(pool.pooled(4096) >= 1);
        let again = RetainableMemory::<u128>::create(4096, false).unwrap();
        assert_eq!(again.as_ptr(), ptr);
        again.dispose();
    }
}
