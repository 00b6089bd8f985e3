//! Error types for block storage.

use std::error::Error;
use std::fmt;

use skein_buffers::BufferError;

/// Recoverable block failures. The block's state is unchanged when one
/// of these is returned.
#[derive(Debug)]
pub enum BlockError {
    /// A column buffer could not be allocated.
    AllocationFailed {
        /// Row capacity that was being allocated.
        requested_rows: usize,
        /// Underlying buffer failure.
        source: BufferError,
    },
    /// The requested capacity does not fit in `usize` elements.
    CapacityOverflow {
        /// Row capacity that was requested.
        requested_rows: usize,
    },
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed {
                requested_rows,
                source,
            } => write!(f, "failed to allocate {requested_rows} rows: {source}"),
            Self::CapacityOverflow { requested_rows } => {
                write!(f, "capacity of {requested_rows} rows overflows")
            }
        }
    }
}

impl Error for BlockError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::AllocationFailed { source, .. } => Some(source),
            Self::CapacityOverflow { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_failure_exposes_source() {
        let err = BlockError::AllocationFailed {
            requested_rows: 64,
            source: BufferError::AllocationFailed { requested: 64 },
        };
        assert!(err.to_string().starts_with("failed to allocate 64 rows"));
        assert!(err.source().is_some());
    }
}
