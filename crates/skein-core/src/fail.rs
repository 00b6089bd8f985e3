//! Fail-fast termination for broken ownership and usage invariants.
//!
//! Counter misuse, stale reuse tokens or typing errors leave memory in a
//! state that cannot be reasoned about, so they are never surfaced as
//! `Result`s. Every such site calls [`fail_fast`], which logs and panics.
//! The workspace release profile sets `panic = "abort"`, turning the panic
//! into a process abort; test builds unwind so the violation can be
//! asserted with `#[should_panic]`.

use std::fmt;

/// A broken invariant that terminates the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// A buffer, slab or cursor was disposed twice.
    DoubleDispose,
    /// A reference count was decremented below zero.
    CounterUnderflow,
    /// A reference count exceeded its representable maximum.
    CounterOverflow,
    /// An object was used after it was disposed.
    UseAfterDispose,
    /// An object was disposed while holders still retained it.
    DisposeWhileRetained,
    /// A pool was asked to take back an object it does not own.
    NotPooled,
    /// A type-erased buffer was accessed with the wrong element type.
    TypeMismatch {
        /// Element type the buffer was created with.
        expected: &'static str,
        /// Element type the caller asked for.
        found: &'static str,
    },
    /// A block was appended to while full.
    CapacityExceeded {
        /// Row capacity of the block.
        capacity: usize,
    },
    /// A row was supplied with the wrong number of columns.
    ColumnCountMismatch {
        /// Columns the block was created with.
        expected: usize,
        /// Columns supplied.
        found: usize,
    },
    /// A row index past the published row count was accessed.
    RowOutOfBounds {
        /// Requested row.
        index: usize,
        /// Published row count.
        row_count: usize,
    },
    /// A block was written through the wrong key mode.
    KeyModeMismatch {
        /// Key mode the block was created with.
        expected: &'static str,
    },
    /// A second writer entered a block while another write was in flight.
    ConcurrentWrite,
    /// A cursor was moved, cloned or disposed after disposal.
    CursorDisposed,
    /// A cursor without a source was moved.
    CursorUninitialized,
    /// A continuation was armed while another one was already armed.
    MultipleContinuations,
    /// An awaiter was reset while a continuation was still outstanding.
    ResetWhileOutstanding,
    /// A result was requested with a token from an earlier reuse cycle.
    StaleToken {
        /// Token held by the caller.
        held: u16,
        /// Token of the current cycle.
        current: u16,
    },
    /// A result was requested before completion or consumed twice.
    ResultNotReady,
    /// A disposed pool was asked for an object.
    PoolDisposed,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoubleDispose => write!(f, "object disposed twice"),
            Self::CounterUnderflow => write!(f, "reference count decremented below zero"),
            Self::CounterOverflow => write!(f, "reference count overflow"),
            Self::UseAfterDispose => write!(f, "use after dispose"),
            Self::DisposeWhileRetained => write!(f, "disposed while still retained"),
            Self::NotPooled => write!(f, "object does not belong to this pool"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "element type mismatch: expected {expected}, found {found}")
            }
            Self::CapacityExceeded { capacity } => {
                write!(f, "append to a full block (capacity {capacity})")
            }
            Self::ColumnCountMismatch { expected, found } => {
                write!(f, "row has {found} columns, block has {expected}")
            }
            Self::RowOutOfBounds { index, row_count } => {
                write!(f, "row {index} out of bounds (row count {row_count})")
            }
            Self::KeyModeMismatch { expected } => {
                write!(f, "key mode mismatch: block uses {expected} keys")
            }
            Self::ConcurrentWrite => write!(f, "concurrent writers on one block"),
            Self::CursorDisposed => write!(f, "cursor used after dispose"),
            Self::CursorUninitialized => write!(f, "cursor has no source"),
            Self::MultipleContinuations => write!(f, "continuation armed twice"),
            Self::ResetWhileOutstanding => {
                write!(f, "awaiter reset while a continuation is outstanding")
            }
            Self::StaleToken { held, current } => {
                write!(f, "stale reuse token {held} (current {current})")
            }
            Self::ResultNotReady => write!(f, "awaiter result not ready or already consumed"),
            Self::PoolDisposed => write!(f, "rent from a disposed pool"),
        }
    }
}

/// Log the violation and terminate.
///
/// Panics with a message prefixed by `fatal:`. When called while the
/// thread is already unwinding, aborts immediately instead of
/// double-panicking.
#[cold]
#[track_caller]
pub fn fail_fast(violation: Violation) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(%violation, %location, "fatal invariant violation");
    if std::thread::panicking() {
        std::process::abort();
    }
    panic!("fatal: {violation}");
}
