//! Reusable suspension point for one cursor.
//!
//! An [`Awaiter`] owns a cursor and resolves waits for its next row. The
//! consumer makes one synchronous attempt first; only when no row is
//! available does it arm a continuation (a stored [`Waker`]). Producers
//! call [`Completer::try_complete`] after every append or completion;
//! the call never blocks and never allocates.
//!
//! # States
//!
//! ```text
//!            try_own_and_reset            arm
//! COMPLETED ─────────────────> AVAILABLE ─────> ARMED
//!     ^                                         │  ^
//!     │ result stored                notifying  │  │ no row yet
//!     └──────────────────────── NOTIFYING <─────┘──┘
//!                                   │ future dropped
//!                                   v
//!                               CANCELLED ──> COMPLETED
//! ```
//!
//! Only the party that moved the state out of `COMPLETED` or `ARMED`
//! touches the cursor, so the slot mutex is never contended by protocol.
//!
//! # Coalescing
//!
//! Completion attempts are serialized by a one-bit lock. A request that
//! finds the lock held raises a `skipped` flag and returns; the holder
//! re-runs its attempt while the flag is set, and re-checks it after
//! unlocking, so no update is lost.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering::SeqCst};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Poll, Waker};

use skein_core::{fail_fast, Violation};
use tracing::trace;

use crate::advance::AdvanceCursor;
use crate::metrics::{AwaiterCounters, AwaiterMetrics};

const AVAILABLE: u8 = 0;
const ARMED: u8 = 1;
const NOTIFYING: u8 = 2;
const COMPLETED: u8 = 3;
const CANCELLED: u8 = 4;

/// Producer-side notification: new data may exist.
pub trait Completer: Send + Sync {
    /// Try to resolve an armed wait. Never blocks; carries no payload.
    fn try_complete(&self);
}

struct Slot<C: AdvanceCursor> {
    cursor: C,
    result: Option<Result<bool, C::Error>>,
    waker: Option<Waker>,
}

/// Outcome of starting a wait.
pub(crate) enum Begin<E> {
    Ready(Result<bool, E>),
    Pending(u16),
    /// An abandoned wait is still being notified; poll again.
    Busy,
}

/// Suspension point shared between one consumer and any number of
/// producers.
pub struct Awaiter<C: AdvanceCursor> {
    state: AtomicU8,
    token: AtomicU16,
    lock: AtomicBool,
    skipped: AtomicBool,
    slot: Mutex<Slot<C>>,
    counters: AwaiterCounters,
}

impl<C: AdvanceCursor> Awaiter<C> {
    /// An idle awaiter over `cursor`.
    pub fn new(cursor: C) -> Self {
        Self {
            state: AtomicU8::new(COMPLETED),
            token: AtomicU16::new(0),
            lock: AtomicBool::new(false),
            skipped: AtomicBool::new(false),
            slot: Mutex::new(Slot {
                cursor,
                result: None,
                waker: None,
            }),
            counters: AwaiterCounters::default(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot<C>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token of the current reuse cycle.
    pub fn token(&self) -> u16 {
        self.token.load(SeqCst)
    }

    /// Whether no wait is armed or being notified.
    pub fn is_completed(&self) -> bool {
        self.state.load(SeqCst) == COMPLETED
    }

    /// Activity counters.
    pub fn metrics(&self) -> AwaiterMetrics {
        self.counters.snapshot()
    }

    /// Claim the idle awaiter for a new wait and return its token.
    ///
    /// Fails fast if a continuation is armed or being notified.
    #[track_caller]
    pub fn try_own_and_reset(&self) -> u16 {
        if self
            .state
            .compare_exchange(COMPLETED, AVAILABLE, SeqCst, SeqCst)
            .is_err()
        {
            fail_fast(Violation::ResetWhileOutstanding);
        }
        self.slot().result = None;
        self.token.fetch_add(1, SeqCst).wrapping_add(1)
    }

    /// Take the result of the cycle identified by `token`, exactly once.
    #[track_caller]
    pub fn take_result(&self, token: u16) -> Result<bool, C::Error> {
        let current = self.token();
        if token != current {
            fail_fast(Violation::StaleToken {
                held: token,
                current,
            });
        }
        if self.state.load(SeqCst) != COMPLETED {
            fail_fast(Violation::ResultNotReady);
        }
        let result = self.slot().result.take();
        match result {
            Some(result) => result,
            None => fail_fast(Violation::ResultNotReady),
        }
    }

    pub(crate) fn with_cursor<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.slot().cursor)
    }

    /// One advance. `None` means keep waiting.
    fn attempt(cursor: &mut C) -> Option<Result<bool, C::Error>> {
        match cursor.try_move_next() {
            Ok(true) => Some(Ok(true)),
            Err(e) => Some(Err(e)),
            // Rows may have landed between the failed move and completion.
            Ok(false) if cursor.is_source_completed() => Some(cursor.try_move_next()),
            Ok(false) => None,
        }
    }

    pub(crate) fn begin(&self, waker: &Waker) -> Begin<C::Error> {
        if self.state.load(SeqCst) != COMPLETED {
            return Begin::Busy;
        }
        // A wait abandoned mid-notification leaves its result behind; the
        // cursor has already moved for it.
        let leftover = self.slot().result.take();
        if let Some(result) = leftover {
            return Begin::Ready(result);
        }

        let token = self.try_own_and_reset();
        let sync = Self::attempt(&mut self.slot().cursor);
        if let Some(result) = sync {
            self.state.store(COMPLETED, SeqCst);
            AwaiterCounters::bump(&self.counters.sync_completions);
            return Begin::Ready(result);
        }

        self.slot().waker = Some(waker.clone());
        if self
            .state
            .compare_exchange(AVAILABLE, ARMED, SeqCst, SeqCst)
            .is_err()
        {
            fail_fast(Violation::MultipleContinuations);
        }
        AwaiterCounters::bump(&self.counters.parks);
        trace!(token, "continuation armed");

        // Data may have arrived between the attempt and arming.
        self.try_complete();
        if self.is_completed() {
            return Begin::Ready(self.take_result(token));
        }
        Begin::Pending(token)
    }

    pub(crate) fn poll_wait(&self, token: u16, waker: &Waker) -> Poll<Result<bool, C::Error>> {
        loop {
            match self.state.load(SeqCst) {
                COMPLETED => return Poll::Ready(self.take_result(token)),
                ARMED => {
                    if self
                        .state
                        .compare_exchange(ARMED, AVAILABLE, SeqCst, SeqCst)
                        .is_err()
                    {
                        continue;
                    }
                    {
                        let mut slot = self.slot();
                        if !slot.waker.as_ref().is_some_and(|w| w.will_wake(waker)) {
                            slot.waker = Some(waker.clone());
                        }
                    }
                    self.state.store(ARMED, SeqCst);
                    self.try_complete();
                    if self.is_completed() {
                        return Poll::Ready(self.take_result(token));
                    }
                    return Poll::Pending;
                }
                _ => {
                    // A producer is mid-attempt and may re-arm with the old waker.
                    waker.wake_by_ref();
                    return Poll::Pending;
                }
            }
        }
    }

    /// Disarm a wait whose future was dropped.
    pub(crate) fn abandon(&self) {
        loop {
            match self.state.load(SeqCst) {
                ARMED => {
                    if self
                        .state
                        .compare_exchange(ARMED, COMPLETED, SeqCst, SeqCst)
                        .is_ok()
                    {
                        self.slot().waker = None;
                        trace!("armed continuation abandoned");
                        return;
                    }
                }
                NOTIFYING => {
                    if self
                        .state
                        .compare_exchange(NOTIFYING, CANCELLED, SeqCst, SeqCst)
                        .is_ok()
                    {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /// One completion attempt under the coalescing lock.
    fn complete_once(&self) -> Option<Waker> {
        if self
            .state
            .compare_exchange(ARMED, NOTIFYING, SeqCst, SeqCst)
            .is_err()
        {
            return None;
        }
        let mut slot = self.slot();
        let Some(result) = Self::attempt(&mut slot.cursor) else {
            drop(slot);
            if self
                .state
                .compare_exchange(NOTIFYING, ARMED, SeqCst, SeqCst)
                .is_err()
            {
                self.state.store(COMPLETED, SeqCst);
            }
            return None;
        };
        slot.result = Some(result);
        let waker = slot.waker.take();
        drop(slot);
        AwaiterCounters::bump(&self.counters.async_completions);
        let previous = self.state.swap(COMPLETED, SeqCst);
        trace!(token = self.token(), "continuation completed");
        if previous == NOTIFYING {
            waker
        } else {
            None
        }
    }
}

impl<C: AdvanceCursor> Completer for Awaiter<C> {
    fn try_complete(&self) {
        self.skipped.store(true, SeqCst);
        loop {
            if self
                .lock
                .compare_exchange(false, true, SeqCst, SeqCst)
                .is_err()
            {
                AwaiterCounters::bump(&self.counters.skipped_updates);
                return;
            }
            let mut wake = None;
            while self.skipped.swap(false, SeqCst) {
                if let Some(waker) = self.complete_once() {
                    wake = Some(waker);
                }
            }
            self.lock.store(false, SeqCst);
            if let Some(waker) = wake {
                waker.wake();
            }
            if !self.skipped.load(SeqCst) {
                return;
            }
        }
    }
}

impl<C: AdvanceCursor> fmt::Debug for Awaiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(SeqCst) {
            AVAILABLE => "available",
            ARMED => "armed",
            NOTIFYING => "notifying",
            COMPLETED => "completed",
            _ => "cancelled",
        };
        f.debug_struct("Awaiter")
            .field("state", &state)
            .field("token", &self.token())
            .field("metrics", &self.metrics())
            .finish()
    }
}

const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Awaiter<crate::BlockCursor<u64, f64, dyn skein_block::Container<u64>>>>();
};

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        moves: u32,
        available: u32,
    }

    impl AdvanceCursor for Counter {
        type Error = ();

        fn try_move_next(&mut self) -> Result<bool, ()> {
            if self.moves < self.available {
                self.moves += 1;
                Ok(true)
            } else {
                Ok(false)
            }
        }

        fn is_source_completed(&self) -> bool {
            false
        }
    }

    fn idle(available: u32) -> Awaiter<Counter> {
        Awaiter::new(Counter {
            moves: 0,
            available,
        })
    }

    #[test]
    fn starts_idle_at_token_zero() {
        let awaiter = idle(0);
        assert!(awaiter.is_completed());
        assert_eq!(awaiter.token(), 0);
        assert_eq!(awaiter.metrics(), AwaiterMetrics::default());
    }

    #[test]
    fn reset_advances_token() {
        let awaiter = idle(0);
        assert_eq!(awaiter.try_own_and_reset(), 1);
        assert!(!awaiter.is_completed());
        assert_eq!(awaiter.token(), 1);
    }

    #[test]
    fn token_wraps() {
        let awaiter = idle(0);
        awaiter.token.store(u16::MAX, SeqCst);
        assert_eq!(awaiter.try_own_and_reset(), 0);
    }

    #[test]
    #[should_panic(expected = "awaiter reset while a continuation is outstanding")]
    fn double_reset_fails_fast() {
        let awaiter = idle(0);
        awaiter.try_own_and_reset();
        awaiter.try_own_and_reset();
    }

    #[test]
    #[should_panic(expected = "awaiter result not ready")]
    fn take_on_idle_fails_fast() {
        let awaiter = idle(0);
        let _ = awaiter.take_result(0);
    }

    #[test]
    fn notification_without_waiter_is_a_no_op() {
        let awaiter = idle(5);
        awaiter.try_complete();
        assert!(awaiter.is_completed());
        assert_eq!(awaiter.with_cursor(|c| c.moves), 0);
        assert_eq!(awaiter.metrics().async_completions, 0);
    }

    #[test]
    fn abandon_when_idle_keeps_state() {
        let awaiter = idle(0);
        awaiter.abandon();
        assert!(awaiter.is_completed());
    }
}
