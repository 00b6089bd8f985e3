//! Skein: the concurrency and memory-lifecycle core of an in-memory
//! columnar series store.
//!
//! This is the facade crate re-exporting the public API of the skein
//! sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use skein::prelude::*;
//! use skein::block::PooledSource;
//!
//! let block = DataBlock::create_for_series::<u64, f64, _>(4, &PooledSource).unwrap();
//! for key in 0..4u64 {
//!     block.append(key, key as f64 * 0.5);
//! }
//! assert!(block.is_full());
//! assert_eq!(block.grow::<u64, f64, _>(8, &PooledSource).unwrap(), 16);
//! assert_eq!(block.row_at::<u64, f64>(3), (3, 1.5));
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `skein-core` | Versions, violations, type tags, lookup, backoff |
//! | [`buffers`] | `skein-buffers` | Pools, retainable memory, slabs |
//! | [`block`] | `skein-block` | Data blocks, buffer sources, chain contracts |
//! | [`cursor`] | `skein-cursor` | Block cursors and async waits |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Shared vocabulary (`skein-core`).
///
/// [`types::ContainerVersions`] is the seqlock every container exposes;
/// [`types::fail_fast`] is the single exit for usage violations.
pub use skein_core as types;

/// Pools and reference-counted memory (`skein-buffers`).
pub use skein_buffers as buffers;

/// Columnar blocks (`skein-block`).
pub use skein_block as block;

/// Cursors over block chains (`skein-cursor`).
pub use skein_cursor as cursor;

/// Common imports.
///
/// ```rust
/// use skein::prelude::*;
/// ```
pub mod prelude {
    // Core
    pub use skein_core::{ContainerVersions, KeyComparer, Lookup, OrdComparer, Violation};

    // Memory
    pub use skein_buffers::{BufferError, MemoryPool, RetainableMemory, Retained};

    // Blocks
    pub use skein_block::{BlockError, BlockRef, ChainAccessor, Container, DataBlock};

    // Cursors
    pub use skein_cursor::{
        AdvanceCursor, AsyncCursor, BlockCursor, Completer, CursorState, OutOfOrderKey,
    };
}
