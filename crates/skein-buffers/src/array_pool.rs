//! Process-wide default array pool.
//!
//! Buffers created without an explicit pool come from here (pool index
//! 1). Arrays are bucketed by power-of-two length between
//! [`MIN_POOLED_BUFFER_LEN`] and [`MAX_POOLED_BUFFER_LEN`]; each bucket
//! is a [`ShardedPool`] without overflow, so surplus arrays are dropped
//! instead of accumulating. Arrays are not cleared on return.

use std::any::{Any, TypeId};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use indexmap::IndexMap;
use skein_core::{fail_fast, ConfigError, ObjectPool, Violation};

use crate::config::{PoolConfig, MAX_POOLED_BUFFER_LEN, MIN_POOLED_BUFFER_LEN};
use crate::error::BufferError;
use crate::pool::ShardedPool;

const BUCKETS: usize =
    (MAX_POOLED_BUFFER_LEN.trailing_zeros() - MIN_POOLED_BUFFER_LEN.trailing_zeros() + 1) as usize;

/// Power-of-two bucketed pool of `Vec<T>`.
pub struct ArrayPool<T> {
    buckets: Box<[OnceLock<ShardedPool<Vec<T>>>]>,
    shard_count: usize,
    shard_capacity: usize,
}

type Registry = Mutex<IndexMap<TypeId, Arc<dyn Any + Send + Sync>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(IndexMap::new()))
}

impl<T: Default + Clone + Send + Sync + 'static> ArrayPool<T> {
    /// An independent pool. Most callers want [`shared`](Self::shared).
    /// The overflow setting of `config` is ignored.
    pub fn new(config: &PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_shards(
            config.resolved_shard_count(),
            config.shard_capacity,
        ))
    }

    fn with_shards(shard_count: usize, shard_capacity: usize) -> Self {
        Self {
            buckets: (0..BUCKETS).map(|_| OnceLock::new()).collect(),
            shard_count,
            shard_capacity,
        }
    }

    /// The process-wide pool for element type `T`.
    pub fn shared() -> Arc<Self> {
        let mut map = registry().lock().unwrap_or_else(PoisonError::into_inner);
        let entry = map
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                let defaults = PoolConfig::default();
                Arc::new(Self::with_shards(
                    defaults.resolved_shard_count(),
                    defaults.shard_capacity,
                )) as Arc<dyn Any + Send + Sync>
            });
        match Arc::clone(entry).downcast::<Self>() {
            Ok(pool) => pool,
            Err(_) => fail_fast(Violation::TypeMismatch {
                expected: "registered array pool",
                found: std::any::type_name::<Self>(),
            }),
        }
    }

    /// Length `rent(min_len)` would return: the next power of two, at
    /// least [`MIN_POOLED_BUFFER_LEN`].
    pub fn bucket_len(min_len: usize) -> Result<usize, BufferError> {
        min_len
            .max(MIN_POOLED_BUFFER_LEN)
            .checked_next_power_of_two()
            .ok_or(BufferError::LengthOverflow { requested: min_len })
    }

    fn bucket_index(len: usize) -> Option<usize> {
        if !len.is_power_of_two() || !(MIN_POOLED_BUFFER_LEN..=MAX_POOLED_BUFFER_LEN).contains(&len)
        {
            return None;
        }
        Some((len.trailing_zeros() - MIN_POOLED_BUFFER_LEN.trailing_zeros()) as usize)
    }

    fn bucket(&self, index: usize) -> &ShardedPool<Vec<T>> {
        self.buckets[index].get_or_init(|| {
            let len = MIN_POOLED_BUFFER_LEN << index;
            ShardedPool::with_shards(self.shard_count, self.shard_capacity, false, move || {
                vec![T::default(); len]
            })
        })
    }

    /// Rent an array of at least `min_len` elements. Allocation failure
    /// on a pool miss aborts, as for any `Vec`.
    pub fn rent(&self, min_len: usize) -> Vec<T> {
        let len = min_len
            .max(MIN_POOLED_BUFFER_LEN)
            .checked_next_power_of_two()
            .unwrap_or(min_len);
        match Self::bucket_index(len) {
            Some(index) => self.bucket(index).rent(),
            None => vec![T::default(); len],
        }
    }

    /// Rent an array of at least `min_len` elements, allocating fallibly
    /// on a pool miss.
    pub fn try_rent(&self, min_len: usize) -> Result<Vec<T>, BufferError> {
        let len = Self::bucket_len(min_len)?;
        if let Some(index) = Self::bucket_index(len) {
            if let Some(array) = self.bucket(index).try_rent_pooled() {
                return Ok(array);
            }
        }
        let mut array = Vec::new();
        array
            .try_reserve_exact(len)
            .map_err(|_| BufferError::AllocationFailed { requested: len })?;
        array.resize(len, T::default());
        Ok(array)
    }

    /// Give an array back. Arrays of non-pooled lengths, or arriving at a
    /// full bucket, are dropped.
    pub fn give_back(&self, array: Vec<T>) {
        if let Some(index) = Self::bucket_index(array.len()) {
            if let Err(array) = self.bucket(index).try_return(array) {
                tracing::trace!(len = array.len(), "array pool bucket full, dropping");
            }
        }
    }

    /// Arrays currently pooled for the bucket holding `len`.
    pub fn pooled(&self, len: usize) -> usize {
        Self::bucket_index(len)
            .and_then(|i| self.buckets[i].get())
            .map_or(0, ShardedPool::pooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_len_rounds_up() {
        assert_eq!(ArrayPool::<u8>::bucket_len(1), Ok(16));
        assert_eq!(ArrayPool::<u8>::bucket_len(17), Ok(32));
        assert_eq!(ArrayPool::<u8>::bucket_len(64), Ok(64));
        assert!(ArrayPool::<u8>::bucket_len(usize::MAX).is_err());
    }

    #[test]
    fn returned_array_is_reused() {
        let pool = ArrayPool::<u32>::new(&PoolConfig {
            shard_count: Some(1),
            ..PoolConfig::default()
        })
        .unwrap();
        let mut a = pool.try_rent(20).unwrap();
        assert_eq!(a.len(), 32);
        a[0] = 99;
        let ptr = a.as_ptr();
        pool.give_back(a);
        assert_eq!(pool.pooled(32), 1);
        let b = pool.try_rent(32).unwrap();
        assert_eq!(b.as_ptr(), ptr);
        assert_eq!(b[0], 99, "arrays are not cleared");
    }

    #[test]
    fn infallible_rent_matches_bucket() {
        let pool = ArrayPool::<u8>::new(&PoolConfig::default()).unwrap();
        assert_eq!(pool.rent(3).len(), 16);
        assert_eq!(pool.rent(100).len(), 128);
    }

    #[test]
    fn odd_lengths_not_pooled() {
        let pool = ArrayPool::<u8>::new(&PoolConfig::default()).unwrap();
        pool.give_back(vec![0; 100]);
        assert_eq!(pool.pooled(128), 0);
    }

    #[test]
    fn shared_is_per_type_singleton() {
        let a = ArrayPool::<i16>::shared();
        let b = ArrayPool::<i16>::shared();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
