//! Where block columns get their memory.
//!
//! [`BufferSource`] is the allocation seam for block creation and growth.
//! Three sources ship with the crate:
//!
//! - [`PooledSource`]: the process-wide default array pool (pool index 1).
//! - [`MemoryPoolSource`]: one [`MemoryPool`] per element type; disposed
//!   columns are recycled whole.
//! - [`SlabSource`]: small columns are carved from slab generations, larger
//!   ones fall through to the default pool.
//!
//! All sources return pinned buffers with the requested length in view.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use indexmap::IndexMap;
use skein_buffers::{
    BufferConfig, BufferError, MemoryPool, PoolConfig, RetainableMemory, SliceBucket,
};
use skein_core::{fail_fast, Violation};

use crate::vec::{Element, RetainedVec};

/// Allocates retained column buffers.
///
/// Not dyn-compatible: `allocate` is generic over the element type.
pub trait BufferSource: Send + Sync {
    /// A buffer with exactly `len` elements in view.
    fn allocate<T: Element>(&self, len: usize) -> Result<RetainedVec, BufferError>;
}

/// Buffers from the shared default array pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct PooledSource;

impl BufferSource for PooledSource {
    fn allocate<T: Element>(&self, len: usize) -> Result<RetainedVec, BufferError> {
        let memory = RetainableMemory::<T>::create(len, true)?;
        Ok(RetainedVec::new(memory.retain_all()))
    }
}

type Registry = Mutex<IndexMap<TypeId, Box<dyn Any + Send + Sync>>>;

/// Look up or create the per-type entry of `T` in `registry`.
fn entry<T: Element, E: Clone + Send + Sync + 'static>(
    registry: &Registry,
    create: impl FnOnce() -> Result<E, BufferError>,
) -> Result<E, BufferError> {
    let mut map = registry.lock().unwrap_or_else(PoisonError::into_inner);
    let id = TypeId::of::<T>();
    if !map.contains_key(&id) {
        map.insert(id, Box::new(create()?));
    }
    match map.get(&id).and_then(|e| e.downcast_ref::<E>()) {
        Some(entry) => Ok(entry.clone()),
        None => fail_fast(Violation::TypeMismatch {
            expected: std::any::type_name::<T>(),
            found: std::any::type_name::<E>(),
        }),
    }
}

/// Buffers from a dedicated [`MemoryPool`] per element type.
pub struct MemoryPoolSource {
    buffers: BufferConfig,
    pool: PoolConfig,
    pools: Registry,
}

impl MemoryPoolSource {
    /// A source whose pools are built from `buffers` and `pool`.
    pub fn new(buffers: BufferConfig, pool: PoolConfig) -> Result<Self, BufferError> {
        buffers.validate()?;
        pool.validate()?;
        Ok(Self {
            buffers,
            pool,
            pools: Mutex::new(IndexMap::new()),
        })
    }

    /// The pool serving element type `T`.
    pub fn pool<T: Element>(&self) -> Result<MemoryPool<T>, BufferError> {
        entry::<T, MemoryPool<T>>(&self.pools, || {
            MemoryPool::new(&self.buffers, &self.pool, true)
        })
    }
}

impl BufferSource for MemoryPoolSource {
    fn allocate<T: Element>(&self, len: usize) -> Result<RetainedVec, BufferError> {
        let memory = self.pool::<T>()?.rent_memory(len)?;
        Ok(RetainedVec::new(memory.retain(0, len)))
    }
}

impl fmt::Debug for MemoryPoolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPoolSource")
            .field("buffers", &self.buffers)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Small buffers carved from slabs, one [`SliceBucket`] per element type.
pub struct SlabSource {
    slice_len: usize,
    config: BufferConfig,
    buckets: Registry,
}

impl SlabSource {
    /// Requests of up to `slice_len` elements are served from slabs.
    pub fn new(slice_len: usize, config: BufferConfig) -> Result<Self, BufferError> {
        config.validate()?;
        config.validate_slice(slice_len)?;
        Ok(Self {
            slice_len,
            config,
            buckets: Mutex::new(IndexMap::new()),
        })
    }

    /// Largest request served from a slab.
    pub fn slice_len(&self) -> usize {
        self.slice_len
    }

    /// The bucket serving element type `T`.
    pub fn bucket<T: Element>(&self) -> Result<SliceBucket<T>, BufferError> {
        entry::<T, SliceBucket<T>>(&self.buckets, || {
            SliceBucket::new(self.slice_len, &self.config, true)
        })
    }
}

impl BufferSource for SlabSource {
    fn allocate<T: Element>(&self, len: usize) -> Result<RetainedVec, BufferError> {
        if len > self.slice_len {
            return PooledSource.allocate::<T>(len);
        }
        let memory = self.bucket::<T>()?.rent_slice();
        Ok(RetainedVec::new(memory.retain(0, len)))
    }
}

impl fmt::Debug for SlabSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabSource")
            .field("slice_len", &self.slice_len)
            .field("config", &self.config)
            .finish()
    }
}
