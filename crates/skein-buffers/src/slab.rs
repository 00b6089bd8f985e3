//! Slab generations and fixed-size slice buckets.
//!
//! A [`SliceBucket`] cuts equal power-of-two slices out of one large
//! [`Slab`] at a time. Each slab carries its own [`AtomicCounter`]: the
//! bucket holds one count while the slab is current and every slice
//! cut from it holds another.
//!
//! ```text
//!   generation 0 (abandoned)        generation 1 (current)
//!   [s0][s1][s2][s3]                [s4][s5][  free  ]
//!    │   └──── count = live slices   └── count = 1 (bucket) + live slices
//!    └──── reclaimed when count reaches 0
//! ```
//!
//! When the current slab runs out, the bucket starts a new generation and
//! drops its count on the old one. Disposed slices of the current
//! generation go to a bounded free pool for reuse; slices of an abandoned
//! generation are not pooled, so their slab drains and is reclaimed.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use skein_core::{fail_fast, ObjectPool, Violation};

use crate::array_pool::ArrayPool;
use crate::config::{BufferConfig, PoolConfig};
use crate::counter::AtomicCounter;
use crate::error::BufferError;
use crate::memory::{BufferElement, PoolIndex, RetainableMemory, ReturnSink};
use crate::pool::ShardedPool;

// ── Slab ───────────────────────────────────────────────────────────

/// One large allocation that slices are cut from.
pub struct Slab<T> {
    counter: AtomicCounter,
    // Taken only once the counter is disposed.
    storage: UnsafeCell<Option<Vec<T>>>,
    base: *mut T,
    len: usize,
    generation: u64,
}

// SAFETY: `storage` is only taken after the counter reaches disposed,
// when no slice references the memory. Elements are Send + Sync.
unsafe impl<T: Send + Sync> Send for Slab<T> {}
// SAFETY: see above.
unsafe impl<T: Send + Sync> Sync for Slab<T> {}

impl<T: BufferElement> Slab<T> {
    fn new(len: usize, generation: u64) -> Arc<Self> {
        let mut storage = ArrayPool::<T>::shared().rent(len);
        let base = storage.as_mut_ptr();
        let slab = Arc::new(Self {
            counter: AtomicCounter::new(),
            storage: UnsafeCell::new(Some(storage)),
            base,
            len,
            generation,
        });
        slab.counter.increment();
        slab
    }

    /// Slab length in elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the slab has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Generation number within its bucket.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Outstanding holders: live slices plus one while the slab is
    /// current.
    pub fn ref_count(&self) -> u32 {
        self.counter.count()
    }

    /// Whether the storage has been handed back.
    pub fn is_reclaimed(&self) -> bool {
        self.counter.is_disposed()
    }

    pub(crate) fn element_ptr(&self, offset: usize) -> *mut T {
        debug_assert!(offset <= self.len);
        // SAFETY: offset is within the slab allocation.
        unsafe { self.base.add(offset) }
    }

    fn acquire(&self) {
        self.counter.increment();
    }

    /// Drop one holder; the last one reclaims the storage.
    pub(crate) fn release(&self) {
        if self.counter.decrement() == 0 {
            self.counter.dispose();
            // SAFETY: disposed; no slice or bucket references the storage.
            let storage = unsafe { (*self.storage.get()).take() };
            if let Some(storage) = storage {
                ArrayPool::<T>::shared().give_back(storage);
            }
            tracing::trace!(generation = self.generation, "slab reclaimed");
        }
    }
}

impl<T> fmt::Debug for Slab<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slab")
            .field("len", &self.len)
            .field("generation", &self.generation)
            .field("count", &self.counter.count())
            .finish()
    }
}

// ── SliceBucket ────────────────────────────────────────────────────

struct Carver<T> {
    slab: Option<Arc<Slab<T>>>,
    next_offset: usize,
}

struct BucketShared<T: BufferElement> {
    slice_len: usize,
    slab_len: usize,
    pin: bool,
    pool_index: PoolIndex,
    accepts_returns: bool,
    carver: Mutex<Carver<T>>,
    free: ShardedPool<Arc<RetainableMemory<T>>>,
    generations: AtomicU64,
    this: Weak<BucketShared<T>>,
}

impl<T: BufferElement> BucketShared<T> {
    fn carve(&self) -> Arc<RetainableMemory<T>> {
        let mut carver = self.carver.lock().unwrap_or_else(PoisonError::into_inner);
        let exhausted = carver.next_offset + self.slice_len > self.slab_len;
        if carver.slab.is_none() || exhausted {
            let generation = self.generations.fetch_add(1, Ordering::Relaxed);
            let fresh = Slab::new(self.slab_len, generation);
            if let Some(old) = carver.slab.replace(fresh) {
                tracing::debug!(
                    abandoned = old.generation(),
                    outstanding = old.ref_count() - 1,
                    "slab exhausted, starting new generation"
                );
                old.release();
            }
            carver.next_offset = 0;
        }
        let offset = carver.next_offset;
        carver.next_offset += self.slice_len;
        let slab = match &carver.slab {
            Some(slab) => Arc::clone(slab),
            None => fail_fast(Violation::PoolDisposed),
        };
        drop(carver);
        slab.acquire();
        let sink: Weak<dyn ReturnSink<T>> = self.this.clone();
        RetainableMemory::slice(slab, offset, self.slice_len, self.pin, self.pool_index, sink)
    }

    fn current_generation(&self) -> Option<u64> {
        self.carver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slab
            .as_ref()
            .map(|s| s.generation())
    }
}

impl<T: BufferElement> ReturnSink<T> for BucketShared<T> {
    fn take_back(
        &self,
        memory: Arc<RetainableMemory<T>>,
    ) -> Result<(), Arc<RetainableMemory<T>>> {
        if !self.accepts_returns {
            return Err(memory);
        }
        // Reading the slab of a disposed slice is fine here: this thread
        // owns it exclusively until it is pooled.
        let generation = memory.slab_generation();
        if generation.is_none() || generation != self.current_generation() {
            return Err(memory);
        }
        self.free.try_return(memory)
    }
}

impl<T: BufferElement> Drop for BucketShared<T> {
    fn drop(&mut self) {
        let carver = self.carver.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(slab) = carver.slab.take() {
            slab.release();
        }
    }
}

/// Hands out fixed-size slices of slab generations.
pub struct SliceBucket<T: BufferElement> {
    shared: Arc<BucketShared<T>>,
}

impl<T: BufferElement> Clone for SliceBucket<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: BufferElement> SliceBucket<T> {
    /// A bucket of `slice_len`-element slices cut from slabs sized by
    /// `config`.
    pub fn new(slice_len: usize, config: &BufferConfig, pin: bool) -> Result<Self, BufferError> {
        config.validate_slice(slice_len)?;
        if pin && std::mem::needs_drop::<T>() {
            return Err(BufferError::NotPinnable {
                type_name: std::any::type_name::<T>(),
            });
        }
        let max_free = config.max_free_slices;
        let defaults = PoolConfig::default();
        let shard_count = defaults.resolved_shard_count().min(max_free.max(1));
        let shard_capacity = max_free.div_ceil(shard_count).max(1);
        let pool_index = PoolIndex::register();
        let shared = Arc::new_cyclic(|this: &Weak<BucketShared<T>>| {
            let factory_ref = this.clone();
            BucketShared {
                slice_len,
                slab_len: config.slab_len,
                pin,
                pool_index,
                accepts_returns: max_free > 0,
                carver: Mutex::new(Carver {
                    slab: None,
                    next_offset: 0,
                }),
                free: ShardedPool::with_shards(shard_count, shard_capacity, false, move || {
                    match factory_ref.upgrade() {
                        Some(bucket) => bucket.carve(),
                        None => fail_fast(Violation::PoolDisposed),
                    }
                }),
                generations: AtomicU64::new(0),
                this: this.clone(),
            }
        });
        Ok(Self { shared })
    }

    /// Rent one slice. The returned buffer has count 0.
    pub fn rent_slice(&self) -> Arc<RetainableMemory<T>> {
        let memory = self.shared.free.rent();
        if memory.is_disposed() {
            memory.revive();
        }
        memory
    }

    /// Slice length in elements.
    pub fn slice_len(&self) -> usize {
        self.shared.slice_len
    }

    /// Pool index shared by every slice of this bucket.
    pub fn pool_index(&self) -> PoolIndex {
        self.shared.pool_index
    }

    /// Slices waiting in the free pool.
    pub fn free_slices(&self) -> usize {
        self.shared.free.pooled()
    }

    /// The slab currently being cut.
    pub fn current_slab(&self) -> Option<Arc<Slab<T>>> {
        self.shared
            .carver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slab
            .clone()
    }

    /// Drop pooled slices. Slices still in use are released normally and
    /// no longer pooled.
    pub fn dispose(&self) {
        self.shared.free.dispose();
    }
}

impl<T: BufferElement> fmt::Debug for SliceBucket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceBucket")
            .field("slice_len", &self.shared.slice_len)
            .field("slab_len", &self.shared.slab_len)
            .field("pool", &self.shared.pool_index)
            .finish()
    }
}
