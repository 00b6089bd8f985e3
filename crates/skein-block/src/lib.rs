//! Columnar block storage for skein.
//!
//! A [`DataBlock`] stores rows of a key-ordered sequence in type-erased
//! column buffers rented from a [`BufferSource`]. Appends publish through
//! a release-ordered row count; growth swaps in larger columns without
//! touching the ones readers may still hold.
//!
//! Chains of blocks are owned elsewhere. [`ChainAccessor`] and
//! [`Container`] describe what readers need from whoever owns them.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod block;
pub mod chain;
pub mod error;
pub mod source;
pub mod vec;

pub use block::{BlockRef, DataBlock, KeyMode, RowValues};
pub use chain::{ChainAccessor, Container};
pub use error::BlockError;
pub use source::{BufferSource, MemoryPoolSource, PooledSource, SlabSource};
pub use vec::{Element, RetainedVec};
