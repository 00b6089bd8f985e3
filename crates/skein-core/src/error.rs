//! Configuration errors shared across the workspace.
//!
//! Runtime failures have their own enums in the crates that raise them
//! (`BufferError`, `BlockError`, `OutOfOrderKey`). Configuration is
//! validated once at construction and reported here.

use std::error::Error;
use std::fmt;

/// Errors detected by the `validate()` methods of configuration structs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A per-shard pool capacity of zero was requested.
    ZeroShardCapacity,
    /// An explicit shard count fell outside `[1, 64]`.
    ShardCountOutOfRange {
        /// The configured value.
        value: usize,
    },
    /// A length that must be a power of two was not.
    NotPowerOfTwo {
        /// Name of the offending field.
        field: &'static str,
        /// The configured value.
        value: usize,
    },
    /// Slab slices must be strictly smaller than the slab they are cut from.
    SliceTooLarge {
        /// Requested slice length in elements.
        slice_len: usize,
        /// Slab length in elements.
        slab_len: usize,
    },
    /// Backoff tuning is inconsistent.
    InvalidBackoff {
        /// Description of which invariant was violated.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroShardCapacity => write!(f, "shard capacity must be at least 1"),
            Self::ShardCountOutOfRange { value } => {
                write!(f, "shard count {value} is outside [1, 64]")
            }
            Self::NotPowerOfTwo { field, value } => {
                write!(f, "{field} must be a power of two, got {value}")
            }
            Self::SliceTooLarge {
                slice_len,
                slab_len,
            } => write!(
                f,
                "slice length {slice_len} must be smaller than slab length {slab_len}"
            ),
            Self::InvalidBackoff { reason } => write!(f, "invalid backoff config: {reason}"),
        }
    }
}

impl Error for ConfigError {}
