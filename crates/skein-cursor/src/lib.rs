//! Readers for skein block chains.
//!
//! - [`BlockCursor`]: a lock-free, seqlock-validated cursor that moves by
//!   strides or repositions by key, and aborts with [`OutOfOrderKey`]
//!   when the container's key order is broken under it.
//! - [`AsyncCursor`]: wraps any [`AdvanceCursor`] so `move_next` can be
//!   awaited. Waits reuse one [`Awaiter`]; producers wake them through a
//!   [`Completer`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod advance;
pub mod async_cursor;
pub mod awaiter;
pub mod cursor;
pub mod error;
pub mod metrics;

pub use advance::AdvanceCursor;
pub use async_cursor::{AsyncCursor, MoveNext};
pub use awaiter::{Awaiter, Completer};
pub use cursor::{BlockCursor, CursorState};
pub use error::OutOfOrderKey;
pub use metrics::AwaiterMetrics;
