//! Sharded object pool.
//!
//! Objects live in a fixed number of bounded lock-free shards. A caller
//! starts at the shard selected by its shard key (by default a per-thread
//! hint) and walks the others only on a miss:
//!
//! ```text
//! rent(key):   shard[key % n] → shard[last_full] → linear scan → overflow → factory
//! return(key): shard[key % n] → shard[last_empty] → linear scan → overflow | reject
//! ```
//!
//! `last_full` remembers the most recent shard a return found full (a good
//! place to rent from); `last_empty` remembers the most recent shard a
//! rent found empty (a good place to return to). Both are locality hints
//! only. When the pool has an overflow queue, returned objects are never
//! dropped.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use skein_core::{fail_fast, ConfigError, ObjectPool, Violation};

use crate::config::PoolConfig;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// One bounded queue, padded to its own cache lines.
#[repr(align(128))]
struct Shard<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Shard<T> {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

/// Pool activity counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects created by the factory because every shard was empty.
    pub factory_calls: u64,
    /// Returns that spilled into the overflow queue.
    pub overflow_pushes: u64,
    /// Rents served from the overflow queue.
    pub overflow_pops: u64,
    /// Returns rejected because the pool was full or disposed.
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    factory_calls: AtomicU64,
    overflow_pushes: AtomicU64,
    overflow_pops: AtomicU64,
    rejected: AtomicU64,
}

/// A bounded-per-shard object pool with optional unbounded overflow.
pub struct ShardedPool<T> {
    shards: Box<[Shard<T>]>,
    overflow: Option<Shard<T>>,
    factory: Factory<T>,
    last_full: AtomicUsize,
    last_empty: AtomicUsize,
    disposed: AtomicBool,
    counters: Counters,
}

// Compile-time assertion: ShardedPool<T> is Send + Sync for Send items.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<ShardedPool<Vec<u8>>>();
};

impl<T: Send> ShardedPool<T> {
    /// Build a pool. `factory` creates objects on a full miss.
    pub fn new(
        config: &PoolConfig,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_shards(
            config.resolved_shard_count(),
            config.shard_capacity,
            config.unbounded_overflow,
            factory,
        ))
    }

    /// Build from already-validated parts.
    pub(crate) fn with_shards(
        shard_count: usize,
        shard_capacity: usize,
        unbounded_overflow: bool,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Shard::new(shard_capacity.max(1)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let overflow = unbounded_overflow.then(|| {
            let (tx, rx) = unbounded();
            Shard { tx, rx }
        });
        Self {
            shards,
            overflow,
            factory: Box::new(factory),
            last_full: AtomicUsize::new(0),
            last_empty: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Objects currently pooled, shards and overflow together. Racy.
    pub fn pooled(&self) -> usize {
        self.shards.iter().map(|s| s.rx.len()).sum::<usize>()
            + self.overflow.as_ref().map_or(0, |o| o.rx.len())
    }

    /// Whether [`dispose`](ObjectPool::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            factory_calls: self.counters.factory_calls.load(Ordering::Relaxed),
            overflow_pushes: self.counters.overflow_pushes.load(Ordering::Relaxed),
            overflow_pops: self.counters.overflow_pops.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Rent starting at the shard selected by `shard_key`.
    #[track_caller]
    pub fn rent_at(&self, shard_key: usize) -> T {
        match self.try_rent_pooled_at(shard_key) {
            Some(item) => item,
            None => {
                self.counters.factory_calls.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("pool miss, using factory");
                (self.factory)()
            }
        }
    }

    /// Rent only from pooled objects; `None` instead of calling the
    /// factory.
    #[track_caller]
    pub fn try_rent_pooled(&self) -> Option<T> {
        self.try_rent_pooled_at(thread_shard_hint())
    }

    /// Like [`try_rent_pooled`](Self::try_rent_pooled) with an explicit
    /// shard key.
    #[track_caller]
    pub fn try_rent_pooled_at(&self, shard_key: usize) -> Option<T> {
        if self.is_disposed() {
            fail_fast(Violation::PoolDisposed);
        }
        let start = shard_key % self.shards.len();
        let hint = self.last_full.load(Ordering::Relaxed) % self.shards.len();
        for index in probe_order(start, hint, self.shards.len()) {
            match self.shards[index].rx.try_recv() {
                Ok(item) => return Some(item),
                Err(_) => self.last_empty.store(index, Ordering::Relaxed),
            }
        }
        let overflow = self.overflow.as_ref()?;
        let item = overflow.rx.try_recv().ok()?;
        self.counters.overflow_pops.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    /// Return starting at the shard selected by `shard_key`.
    pub fn try_return_at(&self, item: T, shard_key: usize) -> Result<(), T> {
        if self.is_disposed() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(item);
        }
        let start = shard_key % self.shards.len();
        let hint = self.last_empty.load(Ordering::Relaxed) % self.shards.len();
        let mut item = item;
        for index in probe_order(start, hint, self.shards.len()) {
            match self.shards[index].tx.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) | Err(TrySendError::Disconnected(back)) => {
                    self.last_full.store(index, Ordering::Relaxed);
                    item = back;
                }
            }
        }
        match &self.overflow {
            Some(overflow) => match overflow.tx.try_send(item) {
                Ok(()) => {
                    self.counters.overflow_pushes.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("all shards full, spilled to overflow");
                    Ok(())
                }
                Err(e) => Err(e.into_inner()),
            },
            None => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(item)
            }
        }
    }
}

impl<T: Send> ObjectPool<T> for ShardedPool<T> {
    fn rent(&self) -> T {
        self.rent_at(thread_shard_hint())
    }

    fn try_return(&self, item: T) -> Result<(), T> {
        self.try_return_at(item, thread_shard_hint())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = self.shards.iter().map(Shard::drain).sum::<usize>()
            + self.overflow.as_ref().map_or(0, Shard::drain);
        tracing::debug!(dropped, "pool disposed");
    }
}

impl<T> fmt::Debug for ShardedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedPool")
            .field("shards", &self.shards.len())
            .field("overflow", &self.overflow.is_some())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Visit `start`, then `hint`, then every other shard in order, each once.
fn probe_order(start: usize, hint: usize, len: usize) -> impl Iterator<Item = usize> {
    std::iter::once(start)
        .chain((hint != start).then_some(hint))
        .chain((1..len).map(move |o| (start + o) % len).filter(move |&i| i != hint))
}

/// Stable per-thread shard key.
pub fn thread_shard_hint() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    thread_local! {
        static HINT: Cell<Option<usize>> = const { Cell::new(None) };
    }
    HINT.with(|hint| match hint.get() {
        Some(h) => h,
        None => {
            let h = NEXT.fetch_add(1, Ordering::Relaxed);
            hint.set(Some(h));
            h
        }
    })
}
