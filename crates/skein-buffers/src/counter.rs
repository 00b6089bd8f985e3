//! Atomic reference counter with a disposed state.
//!
//! One `u32` encodes both the count and a disposed bit, so a single
//! compare-and-swap observes and changes the two together:
//!
//! ```text
//!  31        30 ........................ 0
//! [disposed][            count           ]
//! ```
//!
//! A counter is *retained* while `count > 0`. Disposal is only legal at
//! `count == 0` and is terminal until [`revive`](AtomicCounter::revive),
//! which pools use when handing a recycled object out again. Every misuse
//! ends in [`fail_fast`].

use std::sync::atomic::{AtomicU32, Ordering};

use skein_core::{fail_fast, Violation};

const DISPOSED: u32 = 1 << 31;
const COUNT_MASK: u32 = DISPOSED - 1;

/// Reference counter shared by buffers and slabs.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    state: AtomicU32,
}

impl AtomicCounter {
    /// Live counter with count 0.
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
        }
    }

    /// Current count. Zero for a disposed counter.
    pub fn count(&self) -> u32 {
        self.state.load(Ordering::Acquire) & COUNT_MASK
    }

    /// Whether the count is above zero.
    pub fn is_retained(&self) -> bool {
        self.count() > 0
    }

    /// Whether the counter has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) & DISPOSED != 0
    }

    /// Add one holder. Returns the new count.
    #[track_caller]
    pub fn increment(&self) -> u32 {
        self.update(|current| {
            if current & DISPOSED != 0 {
                fail_fast(Violation::UseAfterDispose);
            }
            if current == COUNT_MASK {
                fail_fast(Violation::CounterOverflow);
            }
            Some(current + 1)
        })
        .map_or(0, |prev| prev + 1)
    }

    /// Remove one holder. Returns the new count; the caller that observes
    /// zero is responsible for disposal.
    #[track_caller]
    pub fn decrement(&self) -> u32 {
        self.update(|current| {
            if current & DISPOSED != 0 {
                fail_fast(Violation::UseAfterDispose);
            }
            if current == 0 {
                fail_fast(Violation::CounterUnderflow);
            }
            Some(current - 1)
        })
        .map_or(0, |prev| prev - 1)
    }

    /// Decrement only when the count is exactly one. Returns whether this
    /// call released the last holder; any other count is left unchanged.
    #[track_caller]
    pub fn decrement_if_one(&self) -> bool {
        self.update(|current| {
            if current & DISPOSED != 0 {
                fail_fast(Violation::UseAfterDispose);
            }
            (current == 1).then_some(0)
        })
        .is_ok()
    }

    /// Increment only when the counter is live and already retained.
    /// Returns the new count, or `None` when nobody holds it.
    pub fn increment_if_retained(&self) -> Option<u32> {
        self.update(|current| {
            if current & DISPOSED != 0 || current == 0 {
                return None;
            }
            if current == COUNT_MASK {
                fail_fast(Violation::CounterOverflow);
            }
            Some(current + 1)
        })
        .ok()
        .map(|prev| prev + 1)
    }

    /// Transition from count 0 to disposed. Fails fast when still retained
    /// or already disposed.
    #[track_caller]
    pub fn dispose(&self) {
        if let Err(current) =
            self.state
                .compare_exchange(0, DISPOSED, Ordering::AcqRel, Ordering::Acquire)
        {
            if current & DISPOSED != 0 {
                fail_fast(Violation::DoubleDispose);
            }
            fail_fast(Violation::DisposeWhileRetained);
        }
    }

    /// Return a disposed counter to the live state with count 0.
    #[track_caller]
    pub fn revive(&self) {
        if self
            .state
            .compare_exchange(DISPOSED, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            fail_fast(Violation::NotPooled);
        }
    }

    fn update(&self, f: impl FnMut(u32) -> Option<u32>) -> Result<u32, u32> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn increment_decrement_round_trip() {
        let c = AtomicCounter::new();
        assert_eq!(c.increment(), 1);
        assert_eq!(c.increment(), 2);
        assert!(c.is_retained());
        assert_eq!(c.decrement(), 1);
        assert_eq!(c.decrement(), 0);
        assert!(!c.is_retained());
        assert!(!c.is_disposed());
    }

    #[test]
    #[should_panic(expected = "decremented below zero")]
    fn decrement_below_zero_fails_fast() {
        let c = AtomicCounter::new();
        c.increment();
        c.decrement();
        c.decrement();
    }

    #[test]
    #[should_panic(expected = "use after dispose")]
    fn increment_after_dispose_fails_fast() {
        let c = AtomicCounter::new();
        c.dispose();
        c.increment();
    }

    #[test]
    #[should_panic(expected = "disposed twice")]
    fn double_dispose_fails_fast() {
        let c = AtomicCounter::new();
        c.dispose();
        c.dispose();
    }

    #[test]
    #[should_panic(expected = "disposed while still retained")]
    fn dispose_while_retained_fails_fast() {
        let c = AtomicCounter::new();
        c.increment();
        c.dispose();
    }

    #[test]
    fn decrement_if_one() {
        let c = AtomicCounter::new();
        c.increment();
        c.increment();
        assert!(!c.decrement_if_one());
        assert_eq!(c.count(), 2);
        c.decrement();
        assert!(c.decrement_if_one());
        assert_eq!(c.count(), 0);
        assert!(!c.decrement_if_one());
    }

    #[test]
    fn increment_if_retained() {
        let c = AtomicCounter::new();
        assert_eq!(c.increment_if_retained(), None);
        c.increment();
        assert_eq!(c.increment_if_retained(), Some(2));
        c.decrement();
        c.decrement();
        c.dispose();
        assert_eq!(c.increment_if_retained(), None);
    }

    #[test]
    fn revive_after_dispose() {
        let c = AtomicCounter::new();
        c.dispose();
        assert_eq!(c.count(), 0);
        c.revive();
        assert!(!c.is_disposed());
        assert_eq!(c.increment(), 1);
    }

    #[test]
    fn concurrent_increments_balance() {
        let c = Arc::new(AtomicCounter::new());
        c.increment();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        c.increment();
                        c.decrement();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.count(), 1);
        assert_eq!(c.decrement(), 0);
    }
}
