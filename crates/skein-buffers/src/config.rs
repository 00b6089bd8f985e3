//! Pool and buffer configuration.

use skein_core::ConfigError;

/// Smallest buffer handed out by the pooled allocators, in elements.
pub const MIN_POOLED_BUFFER_LEN: usize = 16;

/// Largest power-of-two length kept in the default array pool buckets.
pub const MAX_POOLED_BUFFER_LEN: usize = 1 << 20;

/// Hard cap on shard count, regardless of core count.
pub const MAX_SHARDS: usize = 64;

// ── PoolConfig ─────────────────────────────────────────────────────

/// Shape of a [`ShardedPool`](crate::pool::ShardedPool).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of shards. `None` = auto-detect from
    /// `available_parallelism`, clamped to `[1, 64]`.
    pub shard_count: Option<usize>,
    /// Objects each shard holds before it reports full. Default: 8.
    pub shard_capacity: usize,
    /// Whether objects that fit no shard spill into an unbounded
    /// overflow queue instead of being rejected. Default: true.
    pub unbounded_overflow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            shard_count: None,
            shard_capacity: 8,
            unbounded_overflow: true,
        }
    }
}

impl PoolConfig {
    /// Resolve the actual shard count, applying auto-detection if `None`.
    pub fn resolved_shard_count(&self) -> usize {
        match self.shard_count {
            Some(n) => n.clamp(1, MAX_SHARDS),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .clamp(1, MAX_SHARDS),
        }
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_capacity == 0 {
            return Err(ConfigError::ZeroShardCapacity);
        }
        if let Some(n) = self.shard_count {
            if n == 0 || n > MAX_SHARDS {
                return Err(ConfigError::ShardCountOutOfRange { value: n });
            }
        }
        Ok(())
    }
}

// ── BufferConfig ───────────────────────────────────────────────────

/// Sizing of pooled memory and slab slices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferConfig {
    /// Smallest pooled buffer, in elements. Power of two. Default: 16.
    pub min_pooled_buffer_len: usize,
    /// Length of one slab generation, in elements. Power of two.
    /// Default: 65 536.
    pub slab_len: usize,
    /// Free slices a slice bucket keeps for reuse. Slices beyond this
    /// release their slab reference. Default: 64.
    pub max_free_slices: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            min_pooled_buffer_len: MIN_POOLED_BUFFER_LEN,
            slab_len: 1 << 16,
            max_free_slices: 64,
        }
    }
}

impl BufferConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_pooled_buffer_len.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "min_pooled_buffer_len",
                value: self.min_pooled_buffer_len,
            });
        }
        if !self.slab_len.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "slab_len",
                value: self.slab_len,
            });
        }
        Ok(())
    }

    /// Check that `slice_len` can be carved from slabs of this config.
    pub fn validate_slice(&self, slice_len: usize) -> Result<(), ConfigError> {
        self.validate()?;
        if !slice_len.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "slice_len",
                value: slice_len,
            });
        }
        if slice_len >= self.slab_len {
            return Err(ConfigError::SliceTooLarge {
                slice_len,
                slab_len: self.slab_len,
            });
        }
        Ok(())
    }
}
