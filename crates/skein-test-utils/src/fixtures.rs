//! Fault injection and wake accounting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};

use skein_block::{BufferSource, Element, PooledSource, RetainedVec};
use skein_buffers::BufferError;

/// A [`BufferSource`] that serves `budget` allocations from the default
/// pool, then fails every request.
#[derive(Debug)]
pub struct FailingSource {
    remaining: AtomicUsize,
    failures: AtomicUsize,
}

impl FailingSource {
    pub fn new(budget: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(budget),
            failures: AtomicUsize::new(0),
        }
    }

    /// Requests rejected so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Allow `n` more allocations.
    pub fn refill(&self, n: usize) {
        self.remaining.fetch_add(n, Ordering::Relaxed);
    }
}

impl BufferSource for FailingSource {
    fn allocate<T: Element>(&self, len: usize) -> Result<RetainedVec, BufferError> {
        let granted = self
            .remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if granted {
            PooledSource.allocate::<T>(len)
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            Err(BufferError::AllocationFailed { requested: len })
        }
    }
}

/// A waker that counts its wakes.
#[derive(Debug, Default)]
pub struct CountingWaker {
    wakes: AtomicUsize,
}

impl CountingWaker {
    pub fn wakes(&self) -> usize {
        self.wakes.load(Ordering::SeqCst)
    }
}

impl Wake for CountingWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.wakes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A fresh counter and a [`Waker`] feeding it.
pub fn counting_waker() -> (Arc<CountingWaker>, Waker) {
    let counter = Arc::new(CountingWaker::default());
    let waker = Waker::from(Arc::clone(&counter));
    (counter, waker)
}
