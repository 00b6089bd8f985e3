//! Awaitable `move_next` over any [`AdvanceCursor`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use skein_core::{fail_fast, Violation};

use crate::advance::AdvanceCursor;
use crate::awaiter::{Awaiter, Begin, Completer};
use crate::metrics::AwaiterMetrics;

/// A cursor whose advances can be awaited.
///
/// Each wait reuses the same [`Awaiter`]; only the waker is cloned per
/// suspension. Producers hold the [`completer`](Self::completer) and call
/// it after every append and on completion.
pub struct AsyncCursor<C: AdvanceCursor> {
    awaiter: Arc<Awaiter<C>>,
}

impl<C: AdvanceCursor> AsyncCursor<C> {
    /// Wrap `cursor`.
    pub fn new(cursor: C) -> Self {
        Self {
            awaiter: Arc::new(Awaiter::new(cursor)),
        }
    }

    /// Advance one row, waiting for a producer if none is available.
    ///
    /// Resolves `Ok(false)` once the source is completed and drained.
    pub fn move_next_async(&mut self) -> MoveNext<'_, C> {
        MoveNext {
            awaiter: &self.awaiter,
            stage: Stage::Fresh,
        }
    }

    /// Handle for producers.
    pub fn completer(&self) -> Arc<dyn Completer>
    where
        C: 'static,
    {
        self.awaiter.clone()
    }

    /// The underlying awaiter.
    pub fn awaiter(&self) -> &Arc<Awaiter<C>> {
        &self.awaiter
    }

    /// Activity counters.
    pub fn metrics(&self) -> AwaiterMetrics {
        self.awaiter.metrics()
    }

    /// Run `f` on the wrapped cursor between waits.
    pub fn with_cursor<R>(&mut self, f: impl FnOnce(&mut C) -> R) -> R {
        self.awaiter.with_cursor(f)
    }
}

impl<C: AdvanceCursor> std::fmt::Debug for AsyncCursor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCursor")
            .field("awaiter", &self.awaiter)
            .finish()
    }
}

enum Stage {
    Fresh,
    Waiting(u16),
    Done,
}

/// Future returned by [`AsyncCursor::move_next_async`].
///
/// Dropping it while pending disarms the wait.
#[must_use = "futures do nothing unless polled"]
pub struct MoveNext<'a, C: AdvanceCursor> {
    awaiter: &'a Awaiter<C>,
    stage: Stage,
}

impl<C: AdvanceCursor> Future for MoveNext<'_, C> {
    type Output = Result<bool, C::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let poll = match this.stage {
            Stage::Fresh => match this.awaiter.begin(cx.waker()) {
                Begin::Ready(result) => Poll::Ready(result),
                Begin::Pending(token) => {
                    this.stage = Stage::Waiting(token);
                    Poll::Pending
                }
                Begin::Busy => {
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            },
            Stage::Waiting(token) => this.awaiter.poll_wait(token, cx.waker()),
            Stage::Done => fail_fast(Violation::ResultNotReady),
        };
        if poll.is_ready() {
            this.stage = Stage::Done;
        }
        poll
    }
}

impl<C: AdvanceCursor> Drop for MoveNext<'_, C> {
    fn drop(&mut self) {
        if let Stage::Waiting(_) = self.stage {
            self.awaiter.abandon();
        }
    }
}
