//! Optimistic cursors over block chains.
//!
//! A [`BlockCursor`] never locks. Every move follows the same discipline:
//!
//! 1. snapshot the container's before-version;
//! 2. compute the target, reading key and value on the way. A target
//!    inside the current block is resolved locally; otherwise the chain
//!    accessor is walked block by block;
//! 3. validate the snapshot. A write that started in the meantime means
//!    the computation may have seen a torn state: back off and redo it;
//! 4. compare the remembered order version with the container's. A
//!    change means key order was broken: abort with [`OutOfOrderKey`]
//!    instead of retrying;
//! 5. commit: swap the held block reference, index and cached row.
//!
//! Validation always happens after computation, so a committed result was
//! never computed from a torn snapshot.

use std::fmt;
use std::sync::Arc;

use skein_block::{BlockRef, Container, Element};
use skein_core::{fail_fast, Backoff, BackoffConfig, KeyComparer, Lookup, Violation};

use crate::error::OutOfOrderKey;

/// Lifecycle of a cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CursorState {
    /// No source yet.
    Uninitialized,
    /// Has a source, not positioned.
    Initialized,
    /// Positioned on a row.
    Moving,
    /// Terminal.
    Disposed,
}

/// Where a move lands.
struct Target<K, V> {
    block: BlockRef,
    index: usize,
    moved: i64,
    key: K,
    value: V,
}

/// A lock-free reader over a [`Container`]'s block chain.
pub struct BlockCursor<K: Element, V: Element, S: Container<K> + ?Sized> {
    source: Option<Arc<S>>,
    block: Option<BlockRef>,
    index: usize,
    order_version: u64,
    current_key: Option<K>,
    current_value: Option<V>,
    state: CursorState,
    backoff: BackoffConfig,
}

impl<K: Element, V: Element, S: Container<K> + ?Sized> BlockCursor<K, V, S> {
    /// A cursor over `source`, not yet positioned. Remembers the current
    /// order version.
    pub fn new(source: Arc<S>) -> Self {
        let order_version = source.versions().order_version();
        Self {
            source: Some(source),
            block: None,
            index: 0,
            order_version,
            current_key: None,
            current_value: None,
            state: CursorState::Initialized,
            backoff: BackoffConfig::default(),
        }
    }

    /// A cursor without a source.
    pub fn uninitialized() -> Self {
        Self {
            source: None,
            block: None,
            index: 0,
            order_version: 0,
            current_key: None,
            current_value: None,
            state: CursorState::Uninitialized,
            backoff: BackoffConfig::default(),
        }
    }

    /// Attach a source to an uninitialized cursor.
    #[track_caller]
    pub fn initialize(&mut self, source: Arc<S>) {
        match self.state {
            CursorState::Uninitialized => *self = Self::new(source).with_backoff(self.backoff),
            CursorState::Disposed => fail_fast(Violation::CursorDisposed),
            CursorState::Initialized | CursorState::Moving => {
                self.order_version = source.versions().order_version();
                self.source = Some(source);
                self.clear_position();
            }
        }
    }

    /// Use `backoff` for retries after a version mismatch.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Lifecycle state.
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Key of the current row.
    pub fn current_key(&self) -> Option<K> {
        self.current_key
    }

    /// First value of the current row.
    pub fn current_value(&self) -> Option<V> {
        self.current_value
    }

    /// Block holding the current row.
    pub fn current_block(&self) -> Option<&BlockRef> {
        self.block.as_ref()
    }

    /// Row index of the current row within its block.
    pub fn block_index(&self) -> Option<usize> {
        self.block.as_ref().map(|_| self.index)
    }

    /// The source container.
    pub fn source(&self) -> Option<&Arc<S>> {
        self.source.as_ref()
    }

    /// Key order of the source.
    pub fn comparer(&self) -> Option<&dyn KeyComparer<K>> {
        self.source.as_deref().map(|s| s.comparer())
    }

    /// Order version this cursor was last positioned under.
    pub fn order_version(&self) -> u64 {
        self.order_version
    }

    // ── Moves ──────────────────────────────────────────────────────

    /// Move by `stride` rows. Positive strides move forward.
    ///
    /// From an unpositioned cursor, stride `n > 0` lands on the `n`th row
    /// and `-n` on the `n`th row from the end. When the chain runs out,
    /// `allow_partial` clamps to the last reachable row; otherwise the
    /// cursor stays put. Returns the signed number of rows moved.
    #[track_caller]
    pub fn move_by(&mut self, stride: i64, allow_partial: bool) -> Result<i64, OutOfOrderKey<K>> {
        let source = self.live_source();
        if stride == 0 {
            return Ok(0);
        }
        let versions = source.versions();
        let mut backoff = Backoff::new(&self.backoff);
        loop {
            let snapshot = versions.snapshot();
            let at = self.block.as_ref().map(|b| (b, self.index));
            let found = Self::locate(source, at, stride, allow_partial);
            if !versions.validate(snapshot) {
                if backoff.is_yielding() {
                    tracing::trace!(retries = backoff.retries(), "cursor move retrying");
                }
                backoff.snooze();
                continue;
            }
            if versions.order_version() != self.order_version {
                tracing::debug!(key = ?self.current_key, "key order changed under cursor");
                return Err(OutOfOrderKey::new(self.current_key));
            }
            let Some(target) = found else {
                return Ok(0);
            };
            let moved = target.moved;
            self.block = Some(target.block);
            self.index = target.index;
            self.current_key = Some(target.key);
            self.current_value = Some(target.value);
            self.state = CursorState::Moving;
            return Ok(moved);
        }
    }

    /// Move to the next row. `Ok(false)` at the end of the chain.
    #[track_caller]
    pub fn move_next(&mut self) -> Result<bool, OutOfOrderKey<K>> {
        self.move_by(1, false).map(|moved| moved == 1)
    }

    /// Move to the previous row. `Ok(false)` at the start of the chain.
    #[track_caller]
    pub fn move_previous(&mut self) -> Result<bool, OutOfOrderKey<K>> {
        self.move_by(-1, false).map(|moved| moved == -1)
    }

    /// Move to the first row and re-arm the order version.
    #[track_caller]
    pub fn move_first(&mut self) -> bool {
        self.reposition(|source| {
            let first = source.first_block()?;
            walk_forward::<K, S>(source, first, -1, 1, false).map(|(block, index, _)| (block, index))
        })
    }

    /// Move to the last row and re-arm the order version.
    #[track_caller]
    pub fn move_last(&mut self) -> bool {
        self.reposition(|source| {
            let last = source.last_block()?;
            let rows = last.row_count() as i64;
            walk_backward::<K, S>(source, last, rows, 1, false).map(|(block, index, _)| (block, index))
        })
    }

    /// Move to the row selected by `lookup` relative to `key` and re-arm
    /// the order version. This is how a cursor recovers from
    /// [`OutOfOrderKey`]. On a miss the position is unchanged.
    #[track_caller]
    pub fn move_at(&mut self, key: &K, lookup: Lookup) -> bool {
        self.reposition(|source| source.find_block_at(key, lookup))
    }

    fn reposition(&mut self, find: impl Fn(&S) -> Option<(BlockRef, usize)>) -> bool {
        let source = self.live_source();
        let versions = source.versions();
        let mut backoff = Backoff::new(&self.backoff);
        loop {
            let snapshot = versions.snapshot();
            let order_version = versions.order_version();
            let found = find(source).map(|(block, index)| {
                let key = block.key_at::<K>(index);
                let value = block.value_at::<V>(index);
                (block, index, key, value)
            });
            if !versions.validate(snapshot) {
                backoff.snooze();
                continue;
            }
            self.order_version = order_version;
            let Some((block, index, key, value)) = found else {
                return false;
            };
            self.block = Some(block);
            self.index = index;
            self.current_key = Some(key);
            self.current_value = Some(value);
            self.state = CursorState::Moving;
            return true;
        }
    }

    fn locate(
        source: &S,
        at: Option<(&BlockRef, usize)>,
        stride: i64,
        allow_partial: bool,
    ) -> Option<Target<K, V>> {
        let (block, index, moved) = if stride > 0 {
            let (start, index) = match at {
                Some((block, index)) => (block.clone(), index as i64),
                None => (source.first_block()?, -1),
            };
            walk_forward::<K, S>(source, start, index, stride, allow_partial)?
        } else {
            let (start, index) = match at {
                Some((block, index)) => (block.clone(), index as i64),
                None => {
                    let last = source.last_block()?;
                    let rows = last.row_count() as i64;
                    (last, rows)
                }
            };
            let (block, index, moved) =
                walk_backward::<K, S>(source, start, index, stride.saturating_neg(), allow_partial)?;
            (block, index, -moved)
        };
        let key = block.key_at::<K>(index);
        let value = block.value_at::<V>(index);
        Some(Target {
            block,
            index,
            moved,
            key,
            value,
        })
    }

    #[track_caller]
    fn live_source(&self) -> &S {
        match (&self.source, self.state) {
            (_, CursorState::Disposed) => fail_fast(Violation::CursorDisposed),
            (Some(source), _) => source,
            (None, _) => fail_fast(Violation::CursorUninitialized),
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Forget the position. The next move starts from the chain ends and
    /// the order version is re-armed.
    #[track_caller]
    pub fn reset(&mut self) {
        let order_version = self.live_source().versions().order_version();
        self.order_version = order_version;
        self.clear_position();
    }

    /// Release the held block and the source. Disposing twice fails fast.
    #[track_caller]
    pub fn dispose(&mut self) {
        if self.state == CursorState::Disposed {
            fail_fast(Violation::CursorDisposed);
        }
        self.block = None;
        self.source = None;
        self.current_key = None;
        self.current_value = None;
        self.state = CursorState::Disposed;
    }

    fn clear_position(&mut self) {
        self.block = None;
        self.index = 0;
        self.current_key = None;
        self.current_value = None;
        self.state = CursorState::Initialized;
    }
}

/// Walk `steps` rows forward from `index` in `block` (`-1` is before the
/// first row). Returns the landing block, row and rows moved.
fn walk_forward<K, S: Container<K> + ?Sized>(
    source: &S,
    mut block: BlockRef,
    mut index: i64,
    steps: i64,
    allow_partial: bool,
) -> Option<(BlockRef, usize, i64)> {
    let mut remaining = steps;
    let mut moved = 0;
    let mut furthest = None;
    loop {
        let rows = block.row_count() as i64;
        let ahead = rows - 1 - index;
        if remaining <= ahead {
            return Some((block, (index + remaining) as usize, moved + remaining));
        }
        if ahead > 0 {
            moved += ahead;
            remaining -= ahead;
            furthest = Some((block.clone(), (rows - 1) as usize));
        }
        match source.next_block(&block) {
            Some(next) => {
                block = next;
                index = -1;
            }
            None => break,
        }
    }
    if !allow_partial {
        return None;
    }
    furthest.map(|(block, index)| (block, index, moved))
}

/// Walk `steps` rows backward from `index` in `block` (`row_count` is
/// past the last row). Returns the landing block, row and rows moved.
fn walk_backward<K, S: Container<K> + ?Sized>(
    source: &S,
    mut block: BlockRef,
    mut index: i64,
    steps: i64,
    allow_partial: bool,
) -> Option<(BlockRef, usize, i64)> {
    let mut remaining = steps;
    let mut moved = 0;
    let mut furthest = None;
    loop {
        let behind = index;
        if remaining <= behind {
            return Some((block, (index - remaining) as usize, moved + remaining));
        }
        if behind > 0 {
            moved += behind;
            remaining -= behind;
            furthest = Some((block.clone(), 0));
        }
        match source.previous_block(&block) {
            Some(previous) => {
                index = previous.row_count() as i64;
                block = previous;
            }
            None => break,
        }
    }
    if !allow_partial {
        return None;
    }
    furthest.map(|(block, index)| (block, index, moved))
}

impl<K: Element, V: Element, S: Container<K> + ?Sized> Clone for BlockCursor<K, V, S> {
    /// Copies the position; the held block gains one holder.
    #[track_caller]
    fn clone(&self) -> Self {
        if self.state == CursorState::Disposed {
            fail_fast(Violation::CursorDisposed);
        }
        Self {
            source: self.source.clone(),
            block: self.block.clone(),
            index: self.index,
            order_version: self.order_version,
            current_key: self.current_key,
            current_value: self.current_value,
            state: self.state,
            backoff: self.backoff,
        }
    }
}

impl<K: Element, V: Element, S: Container<K> + ?Sized> fmt::Debug for BlockCursor<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCursor")
            .field("state", &self.state)
            .field("index", &self.index)
            .field("key", &self.current_key)
            .field("value", &self.current_value)
            .field("order_version", &self.order_version)
            .finish()
    }
}
