//! Recoverable buffer errors.

use std::error::Error;
use std::fmt;

use skein_core::ConfigError;

/// Errors from buffer creation and pooled allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BufferError {
    /// Pinning was requested for an element type that owns resources and
    /// therefore cannot be shared through a raw pointer.
    NotPinnable {
        /// The element type.
        type_name: &'static str,
    },
    /// The allocator could not provide the requested buffer.
    AllocationFailed {
        /// Requested length in elements.
        requested: usize,
    },
    /// The requested length overflows when rounded to a power of two.
    LengthOverflow {
        /// Requested length in elements.
        requested: usize,
    },
    /// Pool or buffer configuration is invalid.
    Config(ConfigError),
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPinnable { type_name } => {
                write!(f, "element type {type_name} cannot be pinned")
            }
            Self::AllocationFailed { requested } => {
                write!(f, "failed to allocate {requested} elements")
            }
            Self::LengthOverflow { requested } => {
                write!(f, "buffer length {requested} overflows")
            }
            Self::Config(e) => write!(f, "buffer config: {e}"),
        }
    }
}

impl Error for BufferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for BufferError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
