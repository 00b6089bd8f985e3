//! Pools of whole retainable buffers.
//!
//! A [`MemoryPool`] owns a registered [`PoolIndex`] (≥ 2). Its buffers are
//! never torn down on disposal: the whole [`RetainableMemory`], array and
//! all, goes back into a power-of-two size bucket and is revived on the
//! next rent.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use skein_core::{ConfigError, ObjectPool};

use crate::config::{BufferConfig, PoolConfig, MAX_POOLED_BUFFER_LEN};
use crate::error::BufferError;
use crate::memory::{BufferElement, PoolIndex, RetainableMemory, ReturnSink};
use crate::pool::ShardedPool;

struct PoolShared<T: BufferElement> {
    pool_index: PoolIndex,
    pin: bool,
    min_len: usize,
    shard_count: usize,
    shard_capacity: usize,
    buckets: Box<[OnceLock<ShardedPool<Arc<RetainableMemory<T>>>>]>,
    this: Weak<PoolShared<T>>,
}

impl<T: BufferElement> PoolShared<T> {
    fn bucket_index(&self, len: usize) -> Option<usize> {
        if !len.is_power_of_two() || len < self.min_len || len > MAX_POOLED_BUFFER_LEN {
            return None;
        }
        Some((len.trailing_zeros() - self.min_len.trailing_zeros()) as usize)
    }

    fn bucket(&self, index: usize) -> &ShardedPool<Arc<RetainableMemory<T>>> {
        self.buckets[index].get_or_init(|| {
            let len = self.min_len << index;
            let pin = self.pin;
            let pool_index = self.pool_index;
            let sink: Weak<dyn ReturnSink<T>> = self.this.clone();
            ShardedPool::with_shards(self.shard_count, self.shard_capacity, true, move || {
                RetainableMemory::pooled(vec![T::default(); len], pin, pool_index, sink.clone())
            })
        })
    }
}

impl<T: BufferElement> ReturnSink<T> for PoolShared<T> {
    fn take_back(
        &self,
        memory: Arc<RetainableMemory<T>>,
    ) -> Result<(), Arc<RetainableMemory<T>>> {
        match self.bucket_index(memory.len()) {
            Some(index) => self.bucket(index).try_return(memory),
            None => Err(memory),
        }
    }
}

/// A pool of [`RetainableMemory`] buffers with its own pool index.
pub struct MemoryPool<T: BufferElement> {
    shared: Arc<PoolShared<T>>,
}

impl<T: BufferElement> Clone for MemoryPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: BufferElement> MemoryPool<T> {
    /// Build a pool. Every bucket uses `pool` for its shard layout and
    /// always spills into an overflow queue, so disposed buffers are
    /// never dropped while the pool is alive.
    pub fn new(buffers: &BufferConfig, pool: &PoolConfig, pin: bool) -> Result<Self, BufferError> {
        buffers.validate()?;
        pool.validate()?;
        if pin && std::mem::needs_drop::<T>() {
            return Err(BufferError::NotPinnable {
                type_name: std::any::type_name::<T>(),
            });
        }
        let min_len = buffers.min_pooled_buffer_len;
        if min_len > MAX_POOLED_BUFFER_LEN {
            return Err(ConfigError::NotPowerOfTwo {
                field: "min_pooled_buffer_len",
                value: min_len,
            }
            .into());
        }
        let bucket_count =
            (MAX_POOLED_BUFFER_LEN.trailing_zeros() - min_len.trailing_zeros() + 1) as usize;
        let pool_index = PoolIndex::register();
        let shared = Arc::new_cyclic(|this| PoolShared {
            pool_index,
            pin,
            min_len,
            shard_count: pool.resolved_shard_count(),
            shard_capacity: pool.shard_capacity,
            buckets: (0..bucket_count).map(|_| OnceLock::new()).collect(),
            this: this.clone(),
        });
        tracing::debug!(pool = %pool_index, "memory pool registered");
        Ok(Self { shared })
    }

    /// This pool's index.
    pub fn pool_index(&self) -> PoolIndex {
        self.shared.pool_index
    }

    /// Rent a buffer of at least `min_len` elements with count 0.
    ///
    /// Lengths above the largest bucket are allocated on demand and
    /// released on disposal instead of pooled.
    pub fn rent_memory(&self, min_len: usize) -> Result<Arc<RetainableMemory<T>>, BufferError> {
        let len = min_len
            .max(self.shared.min_len)
            .checked_next_power_of_two()
            .ok_or(BufferError::LengthOverflow { requested: min_len })?;
        let Some(index) = self.shared.bucket_index(len) else {
            let mut array = Vec::new();
            array
                .try_reserve_exact(len)
                .map_err(|_| BufferError::AllocationFailed { requested: len })?;
            array.resize(len, T::default());
            let sink: Weak<dyn ReturnSink<T>> = self.shared.this.clone();
            return Ok(RetainableMemory::pooled(
                array,
                self.shared.pin,
                self.shared.pool_index,
                sink,
            ));
        };
        let memory = self.shared.bucket(index).rent();
        if memory.is_disposed() {
            memory.revive();
        }
        Ok(memory)
    }

    /// Disposed buffers waiting in the bucket for `len`.
    pub fn pooled(&self, len: usize) -> usize {
        self.shared
            .bucket_index(len)
            .and_then(|i| self.shared.buckets[i].get())
            .map_or(0, ShardedPool::pooled)
    }

    /// Drop every pooled buffer. Buffers still in use release their
    /// storage when disposed.
    pub fn dispose(&self) {
        for bucket in self.shared.buckets.iter().filter_map(OnceLock::get) {
            bucket.dispose();
        }
    }
}

impl<T: BufferElement> fmt::Debug for MemoryPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("pool", &self.shared.pool_index)
            .field("min_len", &self.shared.min_len)
            .finish()
    }
}
