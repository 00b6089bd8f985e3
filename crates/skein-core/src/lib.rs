//! Core types for the skein columnar series store.
//!
//! This is the leaf crate of the workspace: it defines the shared
//! vocabulary every other crate builds on, and nothing here allocates
//! buffers or blocks.
//!
//! # Contents
//!
//! - [`ContainerVersions`]: the before/after version pair (a seqlock),
//!   the separate order version and the terminal completion flag that a
//!   container exposes to its readers.
//! - [`fail_fast`] and [`Violation`]: the single exit for broken
//!   ownership or usage invariants.
//! - [`TypeTag`]: runtime element-type descriptors for type-erased
//!   columns.
//! - [`Lookup`] and [`KeyComparer`]: key search semantics shared by
//!   blocks and chain accessors.
//! - [`Backoff`] and [`BackoffConfig`]: bounded spin-then-yield retry used
//!   by optimistic readers.
//! - [`ObjectPool`]: the rent/return contract consumed by the memory
//!   layer.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod backoff;
pub mod error;
pub mod fail;
pub mod lookup;
pub mod pool;
pub mod tag;
pub mod version;

pub use backoff::{Backoff, BackoffConfig};
pub use error::ConfigError;
pub use fail::{fail_fast, Violation};
pub use lookup::{KeyComparer, Lookup, OrdComparer};
pub use pool::ObjectPool;
pub use tag::TypeTag;
pub use version::{ContainerVersions, WriteGuard};
