//! Bounded spin-then-yield backoff for optimistic retry loops.
//!
//! Readers that observe a version transition retry from scratch. The first
//! few retries spin with an exponentially growing count of
//! `spin_loop` hints; after `spin_limit` steps the backoff yields the
//! thread instead. The step counter saturates at `yield_limit`.

use std::hint;
use std::thread;

use crate::error::ConfigError;

/// Upper bound for `spin_limit`: `1 << 16` spin hints per step.
const MAX_SPIN_LIMIT: u32 = 16;

// ── BackoffConfig ──────────────────────────────────────────────────

/// Tuning for [`Backoff`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Steps that spin before the backoff starts yielding. Step `n` spins
    /// `1 << n` times. Default: 6.
    pub spin_limit: u32,
    /// Step at which the counter saturates. Default: 10.
    pub yield_limit: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            spin_limit: 6,
            yield_limit: 10,
        }
    }
}

impl BackoffConfig {
    /// Check the tuning invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spin_limit > MAX_SPIN_LIMIT {
            return Err(ConfigError::InvalidBackoff {
                reason: format!(
                    "spin_limit ({}) must be <= {MAX_SPIN_LIMIT}",
                    self.spin_limit
                ),
            });
        }
        if self.yield_limit < self.spin_limit {
            return Err(ConfigError::InvalidBackoff {
                reason: format!(
                    "yield_limit ({}) must be >= spin_limit ({})",
                    self.yield_limit, self.spin_limit
                ),
            });
        }
        Ok(())
    }
}

// ── Backoff ────────────────────────────────────────────────────────

/// Per-operation retry state. Create one per retry loop.
#[derive(Debug)]
pub struct Backoff {
    step: u32,
    retries: u64,
    spin_limit: u32,
    yield_limit: u32,
}

impl Backoff {
    /// Fresh backoff using the given tuning.
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            step: 0,
            retries: 0,
            spin_limit: config.spin_limit.min(MAX_SPIN_LIMIT),
            yield_limit: config.yield_limit.max(config.spin_limit),
        }
    }

    /// Wait before the next retry.
    pub fn snooze(&mut self) {
        if self.step <= self.spin_limit {
            for _ in 0..(1u32 << self.step) {
                hint::spin_loop();
            }
        } else {
            thread::yield_now();
        }
        if self.step < self.yield_limit {
            self.step += 1;
        }
        self.retries += 1;
    }

    /// Whether the backoff has moved past spinning into yielding.
    pub fn is_yielding(&self) -> bool {
        self.step > self.spin_limit
    }

    /// Number of times [`snooze`](Self::snooze) has been called.
    pub fn retries(&self) -> u64 {
        self.retries
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(&BackoffConfig::default())
    }
}
