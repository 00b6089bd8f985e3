//! Pooling and reference-counted memory for skein.
//!
//! Two layers, leaves first:
//!
//! ```text
//! ShardedPool<T>          bounded lock-free shards + overflow + factory
//! ├── ArrayPool<T>        pool index 1: process-wide Vec<T> buckets
//! ├── MemoryPool<T>       pool index ≥ 2: whole RetainableMemory buckets
//! └── SliceBucket<T>      pool index ≥ 2: slices of ref-counted slab generations
//!
//! RetainableMemory<T>     explicit AtomicCounter {count, retained, disposed}
//! └── Retained<T>         one holder; drop releases, last release disposes
//! ```
//!
//! Counter misuse (double dispose, decrement below zero, use after
//! dispose) is fatal and goes through [`skein_core::fail_fast`].
//! Outstanding [`Retained`] handles can be listed through the
//! [`LeakTracker`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unsafe_code)]

pub mod array_pool;
pub mod config;
pub mod counter;
pub mod error;
pub mod leak;
#[allow(unsafe_code)]
pub mod memory;
pub mod memory_pool;
pub mod pool;
#[allow(unsafe_code)]
pub mod retained;
#[allow(unsafe_code)]
pub mod slab;

pub use array_pool::ArrayPool;
pub use config::{BufferConfig, PoolConfig, MIN_POOLED_BUFFER_LEN};
pub use counter::AtomicCounter;
pub use error::BufferError;
pub use leak::{Acquisition, LeakTracker};
pub use memory::{BufferElement, PoolIndex, RetainableMemory};
pub use memory_pool::MemoryPool;
pub use pool::{PoolStats, ShardedPool};
pub use retained::Retained;
pub use slab::{SliceBucket, Slab};
