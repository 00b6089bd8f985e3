//! Columnar block storage nodes.
//!
//! A [`DataBlock`] holds a run of rows of a key-ordered sequence:
//!
//! ```text
//! columns ──► Columns { keys:   [k0 k1 k2 .. k(cap-1)]        (absent for implicit keys)
//!                       values: [v0 v1 v2 .. v(cap*cols-1)]   (row-major) }
//! row_count ── rows [0, row_count) are published
//! ```
//!
//! One writer at a time appends at `row_count` and then stores the new
//! count with `Release`. That store is the publish barrier: a reader that
//! loads the count with `Acquire` sees every column write of every row
//! below it. Readers always load the count before the columns pointer.
//!
//! Growth never mutates in place. Fresh buffers are allocated, the
//! published rows copied, and the columns pointer swapped in one atomic
//! step. The replaced columns are retired, not freed, so a reader that
//! loaded the old pointer keeps reading valid (if stale) rows until the
//! block itself is dropped.
//!
//! Element types are fixed at creation through [`TypeTag`]s; every typed
//! access with the wrong type fails fast.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use skein_buffers::{Retained, MIN_POOLED_BUFFER_LEN};
use skein_core::lookup::search;
use skein_core::{fail_fast, KeyComparer, Lookup, TypeTag, Violation};
use smallvec::SmallVec;

use crate::error::BlockError;
use crate::source::BufferSource;
use crate::vec::{Element, RetainedVec};

/// How a block stores row keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyMode {
    /// Keys live in their own column.
    Explicit,
    /// No key column: the key of row `i` is `index_base + i` as a `u64`.
    Implicit,
}

impl KeyMode {
    fn name(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Implicit => "implicit",
        }
    }
}

/// The values of one panel row, inline for up to four columns.
pub type RowValues<V> = SmallVec<[V; 4]>;

struct Columns {
    keys: Option<RetainedVec>,
    values: RetainedVec,
    capacity: usize,
}

impl Columns {
    fn allocate<K: Element, V: Element, S: BufferSource + ?Sized>(
        key_mode: KeyMode,
        capacity: usize,
        column_count: usize,
        source: &S,
    ) -> Result<Self, BlockError> {
        let value_len = capacity
            .checked_mul(column_count)
            .ok_or(BlockError::CapacityOverflow {
                requested_rows: capacity,
            })?;
        let failed = |e| BlockError::AllocationFailed {
            requested_rows: capacity,
            source: e,
        };
        let keys = match key_mode {
            KeyMode::Explicit => Some(source.allocate::<K>(capacity).map_err(failed)?),
            KeyMode::Implicit => None,
        };
        // An error here drops `keys`, releasing it back to its pool.
        let values = source.allocate::<V>(value_len).map_err(failed)?;
        Ok(Self {
            keys,
            values,
            capacity,
        })
    }

    #[track_caller]
    fn key_ptr<K: Element>(&self) -> *mut K {
        match &self.keys {
            Some(keys) => keys.as_ptr::<K>(),
            None => fail_fast(Violation::KeyModeMismatch {
                expected: KeyMode::Implicit.name(),
            }),
        }
    }
}

/// A column set replaced by growth, freed when the block drops.
struct Retired(*mut Columns);

// SAFETY: owns the pointee like a `Box`; `Columns` is Send + Sync.
unsafe impl Send for Retired {}

impl Drop for Retired {
    fn drop(&mut self) {
        // SAFETY: created by `Box::into_raw`; once the block drops no
        // reader can still hold it.
        drop(unsafe { Box::from_raw(self.0) });
    }
}

/// Clears the single-writer flag on drop.
struct WriteSection<'a>(&'a AtomicBool);

impl Drop for WriteSection<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A fixed-capacity columnar storage node.
///
/// Writers (`append*`, `grow`, `overwrite`, `insert`) must not run
/// concurrently on one block; a second writer entering while another is
/// active fails fast. Any number of readers may run alongside the writer.
/// `overwrite` and `insert` change published rows and are only safe for
/// readers that validate against the container's version counters, so
/// callers must hold the container's write guard around them.
pub struct DataBlock {
    columns: AtomicPtr<Columns>,
    retired: Mutex<Vec<Retired>>,
    row_count: AtomicUsize,
    column_count: usize,
    key_mode: KeyMode,
    index_base: u64,
    key_tag: TypeTag,
    value_tag: TypeTag,
    writing: AtomicBool,
    chain_index: AtomicUsize,
}

// Compile-time assertion: DataBlock must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<DataBlock>();
};

impl DataBlock {
    /// A series block: one key column and one value column.
    pub fn create_for_series<K: Element, V: Element, S: BufferSource + ?Sized>(
        capacity: usize,
        source: &S,
    ) -> Result<Self, BlockError> {
        Self::create::<K, V, S>(KeyMode::Explicit, capacity, 1, 0, source)
    }

    /// A panel block: one key column and `column_count` value columns.
    #[track_caller]
    pub fn create_for_panel<K: Element, V: Element, S: BufferSource + ?Sized>(
        capacity: usize,
        column_count: usize,
        source: &S,
    ) -> Result<Self, BlockError> {
        if column_count == 0 {
            fail_fast(Violation::ColumnCountMismatch {
                expected: 1,
                found: 0,
            });
        }
        Self::create::<K, V, S>(KeyMode::Explicit, capacity, column_count, 0, source)
    }

    /// A vector block: implicit `u64` keys counting up from `index_base`.
    pub fn create_for_vector<V: Element, S: BufferSource + ?Sized>(
        capacity: usize,
        index_base: u64,
        source: &S,
    ) -> Result<Self, BlockError> {
        Self::create::<u64, V, S>(KeyMode::Implicit, capacity, 1, index_base, source)
    }

    fn create<K: Element, V: Element, S: BufferSource + ?Sized>(
        key_mode: KeyMode,
        capacity: usize,
        column_count: usize,
        index_base: u64,
        source: &S,
    ) -> Result<Self, BlockError> {
        let columns = Columns::allocate::<K, V, S>(key_mode, capacity, column_count, source)?;
        Ok(Self {
            columns: AtomicPtr::new(Box::into_raw(Box::new(columns))),
            retired: Mutex::new(Vec::new()),
            row_count: AtomicUsize::new(0),
            column_count,
            key_mode,
            index_base,
            key_tag: TypeTag::of::<K>(),
            value_tag: TypeTag::of::<V>(),
            writing: AtomicBool::new(false),
            chain_index: AtomicUsize::new(0),
        })
    }

    // ── Shape ──────────────────────────────────────────────────────

    /// Published rows.
    pub fn row_count(&self) -> usize {
        self.row_count.load(Ordering::Acquire)
    }

    /// Rows the current columns can hold.
    pub fn row_capacity(&self) -> usize {
        self.current().capacity
    }

    /// Value columns per row.
    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Whether appends would fail without growing.
    pub fn is_full(&self) -> bool {
        self.row_count() >= self.row_capacity()
    }

    /// Whether no rows are published.
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// How keys are stored.
    pub fn key_mode(&self) -> KeyMode {
        self.key_mode
    }

    /// Key of row 0 in implicit mode.
    pub fn index_base(&self) -> u64 {
        self.index_base
    }

    /// Key element type.
    pub fn key_tag(&self) -> TypeTag {
        self.key_tag
    }

    /// Value element type.
    pub fn value_tag(&self) -> TypeTag {
        self.value_tag
    }

    /// Column sets replaced by growth and kept for in-flight readers.
    pub fn retired_columns(&self) -> usize {
        self.retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Position hint maintained by the chain owner.
    pub fn chain_index(&self) -> usize {
        self.chain_index.load(Ordering::Relaxed)
    }

    /// Record this block's position in its chain.
    pub fn set_chain_index(&self, index: usize) {
        self.chain_index.store(index, Ordering::Relaxed);
    }

    // ── Writer ─────────────────────────────────────────────────────

    /// Append a row, failing fast when the block is full.
    #[track_caller]
    pub fn append<K: Element, V: Element>(&self, key: K, value: V) {
        if !self.try_append(key, value) {
            fail_fast(Violation::CapacityExceeded {
                capacity: self.row_capacity(),
            });
        }
    }

    /// Append a row. Returns `false` without mutation when full.
    #[track_caller]
    pub fn try_append<K: Element, V: Element>(&self, key: K, value: V) -> bool {
        self.check_types::<K, V>();
        self.check_key_mode(KeyMode::Explicit);
        self.check_columns(1);
        self.push_row(|columns, row| {
            // SAFETY: `row < capacity`; unpublished rows are touched only by
            // the writer holding the write section.
            unsafe {
                columns.key_ptr::<K>().add(row).write(key);
                columns.values.as_ptr::<V>().add(row).write(value);
            }
        })
    }

    /// Append a panel row, failing fast when the block is full.
    #[track_caller]
    pub fn append_row<K: Element, V: Element>(&self, key: K, values: &[V]) {
        if !self.try_append_row(key, values) {
            fail_fast(Violation::CapacityExceeded {
                capacity: self.row_capacity(),
            });
        }
    }

    /// Append a panel row. Returns `false` without mutation when full.
    #[track_caller]
    pub fn try_append_row<K: Element, V: Element>(&self, key: K, values: &[V]) -> bool {
        self.check_types::<K, V>();
        self.check_key_mode(KeyMode::Explicit);
        self.check_columns(values.len());
        let width = self.column_count;
        self.push_row(|columns, row| {
            // SAFETY: as in `try_append`; the value range is
            // `[row * width, (row + 1) * width)`, inside the value column.
            unsafe {
                columns.key_ptr::<K>().add(row).write(key);
                ptr::copy_nonoverlapping(
                    values.as_ptr(),
                    columns.values.as_ptr::<V>().add(row * width),
                    width,
                );
            }
        })
    }

    /// Append to a vector block, failing fast when full.
    #[track_caller]
    pub fn append_value<V: Element>(&self, value: V) {
        if !self.try_append_value(value) {
            fail_fast(Violation::CapacityExceeded {
                capacity: self.row_capacity(),
            });
        }
    }

    /// Append to a vector block. Returns `false` without mutation when
    /// full.
    #[track_caller]
    pub fn try_append_value<V: Element>(&self, value: V) -> bool {
        self.value_tag.ensure::<V>();
        self.check_key_mode(KeyMode::Implicit);
        self.check_columns(1);
        self.push_row(|columns, row| {
            // SAFETY: as in `try_append`.
            unsafe { columns.values.as_ptr::<V>().add(row).write(value) }
        })
    }

    fn push_row(&self, write: impl FnOnce(&Columns, usize)) -> bool {
        let _section = self.enter_write();
        let columns = self.current();
        let row = self.row_count.load(Ordering::Relaxed);
        if row >= columns.capacity {
            return false;
        }
        write(columns, row);
        self.row_count.store(row + 1, Ordering::Release);
        true
    }

    /// Grow to at least `new_capacity` rows.
    ///
    /// The new capacity is `max(new_capacity, 16, capacity + 1)` rounded
    /// up to a power of two; it is returned on success. On failure the
    /// block is untouched and every buffer acquired for the attempt has
    /// been released.
    #[track_caller]
    pub fn grow<K: Element, V: Element, S: BufferSource + ?Sized>(
        &self,
        new_capacity: usize,
        source: &S,
    ) -> Result<usize, BlockError> {
        self.check_types::<K, V>();
        let _section = self.enter_write();
        let old = self.current();
        let requested = new_capacity
            .max(MIN_POOLED_BUFFER_LEN)
            .max(old.capacity.saturating_add(1));
        let target = requested
            .checked_next_power_of_two()
            .ok_or(BlockError::CapacityOverflow {
                requested_rows: requested,
            })?;
        let fresh = match Columns::allocate::<K, V, S>(self.key_mode, target, self.column_count, source)
        {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!(from = old.capacity, to = target, error = %e, "block growth failed");
                return Err(e);
            }
        };
        let rows = self.row_count.load(Ordering::Relaxed);
        // SAFETY: both column sets hold at least `rows` rows and the fresh
        // one is not yet visible to anyone else.
        unsafe {
            if let (Some(from), Some(to)) = (&old.keys, &fresh.keys) {
                ptr::copy_nonoverlapping(from.as_ptr::<K>(), to.as_ptr::<K>(), rows);
            }
            ptr::copy_nonoverlapping(
                old.values.as_ptr::<V>(),
                fresh.values.as_ptr::<V>(),
                rows * self.column_count,
            );
        }
        let from = old.capacity;
        let previous = self
            .columns
            .swap(Box::into_raw(Box::new(fresh)), Ordering::AcqRel);
        // Readers that loaded `previous` may still be using it.
        self.retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Retired(previous));
        tracing::debug!(from, to = target, rows, "block grown");
        Ok(target)
    }

    /// Replace the key and value of published row `index`.
    #[track_caller]
    pub fn overwrite<K: Element, V: Element>(&self, index: usize, key: K, value: V) {
        self.check_types::<K, V>();
        self.check_key_mode(KeyMode::Explicit);
        self.check_columns(1);
        let _section = self.enter_write();
        let rows = self.row_count.load(Ordering::Relaxed);
        check_row(index, rows);
        let columns = self.current();
        // SAFETY: `index < rows <= capacity`. Concurrent readers may see
        // a torn row; they detect it through the container versions.
        unsafe {
            ptr::write_volatile(columns.key_ptr::<K>().add(index), key);
            ptr::write_volatile(columns.values.as_ptr::<V>().add(index), value);
        }
    }

    /// Insert a row at `index`, shifting later rows up by one. Returns
    /// `false` without mutation when full.
    #[track_caller]
    pub fn insert<K: Element, V: Element>(&self, index: usize, key: K, value: V) -> bool {
        self.check_types::<K, V>();
        self.check_key_mode(KeyMode::Explicit);
        self.check_columns(1);
        let _section = self.enter_write();
        let rows = self.row_count.load(Ordering::Relaxed);
        if index > rows {
            fail_fast(Violation::RowOutOfBounds {
                index,
                row_count: rows,
            });
        }
        let columns = self.current();
        if rows >= columns.capacity {
            return false;
        }
        let tail = rows - index;
        // SAFETY: `rows < capacity`, so `[index, rows]` is in bounds.
        // Readers see shifted rows only inside a version window.
        unsafe {
            let keys = columns.key_ptr::<K>().add(index);
            let values = columns.values.as_ptr::<V>().add(index);
            ptr::copy(keys, keys.add(1), tail);
            ptr::copy(values, values.add(1), tail);
            ptr::write_volatile(keys, key);
            ptr::write_volatile(values, value);
        }
        self.row_count.store(rows + 1, Ordering::Release);
        true
    }

    #[track_caller]
    fn enter_write(&self) -> WriteSection<'_> {
        if self
            .writing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            fail_fast(Violation::ConcurrentWrite);
        }
        WriteSection(&self.writing)
    }

    // ── Readers ────────────────────────────────────────────────────

    fn current(&self) -> &Columns {
        // SAFETY: never null; replaced column sets are retired, not freed,
        // until the block drops.
        unsafe { &*self.columns.load(Ordering::Acquire) }
    }

    /// Published row count and the columns holding at least that many
    /// rows. The count must be loaded first.
    fn published(&self) -> (usize, &Columns) {
        let rows = self.row_count();
        (rows, self.current())
    }

    /// Key of published row `index`.
    #[track_caller]
    pub fn key_at<K: Element>(&self, index: usize) -> K {
        self.key_tag.ensure::<K>();
        let (rows, columns) = self.published();
        check_row(index, rows);
        self.read_key(columns, index)
    }

    /// First value of published row `index`.
    #[track_caller]
    pub fn value_at<V: Element>(&self, index: usize) -> V {
        self.panel_value_at(index, 0)
    }

    /// Key and first value of published row `index`.
    #[track_caller]
    pub fn row_at<K: Element, V: Element>(&self, index: usize) -> (K, V) {
        self.check_types::<K, V>();
        let (rows, columns) = self.published();
        check_row(index, rows);
        (
            self.read_key(columns, index),
            self.read_value(columns, index, 0),
        )
    }

    /// Value in `column` of published row `row`.
    #[track_caller]
    pub fn panel_value_at<V: Element>(&self, row: usize, column: usize) -> V {
        self.value_tag.ensure::<V>();
        if column >= self.column_count {
            fail_fast(Violation::ColumnCountMismatch {
                expected: self.column_count,
                found: column + 1,
            });
        }
        let (rows, columns) = self.published();
        check_row(row, rows);
        self.read_value(columns, row, column)
    }

    /// Every value of published row `index`.
    #[track_caller]
    pub fn row_values<V: Element>(&self, index: usize) -> RowValues<V> {
        self.value_tag.ensure::<V>();
        let (rows, columns) = self.published();
        check_row(index, rows);
        (0..self.column_count)
            .map(|column| self.read_value(columns, index, column))
            .collect()
    }

    /// Key of the first published row.
    pub fn first_key<K: Element>(&self) -> Option<K> {
        self.key_tag.ensure::<K>();
        let (rows, columns) = self.published();
        (rows > 0).then(|| self.read_key(columns, 0))
    }

    /// Key of the last published row.
    pub fn last_key<K: Element>(&self) -> Option<K> {
        self.key_tag.ensure::<K>();
        let (rows, columns) = self.published();
        rows.checked_sub(1).map(|last| self.read_key(columns, last))
    }

    /// Binary search over the published keys.
    pub fn search_key<K: Element>(
        &self,
        key: &K,
        lookup: Lookup,
        comparer: &dyn KeyComparer<K>,
    ) -> Option<usize> {
        self.key_tag.ensure::<K>();
        let (rows, columns) = self.published();
        search(rows, |i| self.read_key(columns, i), key, lookup, comparer)
    }

    /// A new holder of the current value column.
    #[track_caller]
    pub fn values<V: Element>(&self) -> Retained<V> {
        self.current().values.handle::<V>().clone()
    }

    fn read_key<K: Element>(&self, columns: &Columns, index: usize) -> K {
        match self.key_mode {
            KeyMode::Implicit => implicit_key(self.index_base + index as u64),
            // SAFETY: `index` is below a published count loaded before
            // `columns`, so the slot is initialized and in bounds.
            KeyMode::Explicit => unsafe { ptr::read_volatile(columns.key_ptr::<K>().add(index)) },
        }
    }

    fn read_value<V: Element>(&self, columns: &Columns, row: usize, column: usize) -> V {
        // SAFETY: as in `read_key`, and `column < column_count`.
        unsafe {
            ptr::read_volatile(
                columns
                    .values
                    .as_ptr::<V>()
                    .add(row * self.column_count + column),
            )
        }
    }

    // ── Checks ─────────────────────────────────────────────────────

    #[track_caller]
    fn check_types<K: Element, V: Element>(&self) {
        self.key_tag.ensure::<K>();
        self.value_tag.ensure::<V>();
    }

    #[track_caller]
    fn check_key_mode(&self, mode: KeyMode) {
        if self.key_mode != mode {
            fail_fast(Violation::KeyModeMismatch {
                expected: self.key_mode.name(),
            });
        }
    }

    #[track_caller]
    fn check_columns(&self, found: usize) {
        if found != self.column_count {
            fail_fast(Violation::ColumnCountMismatch {
                expected: self.column_count,
                found,
            });
        }
    }
}

#[track_caller]
fn check_row(index: usize, row_count: usize) {
    if index >= row_count {
        fail_fast(Violation::RowOutOfBounds { index, row_count });
    }
}

#[track_caller]
fn implicit_key<K: Element>(position: u64) -> K {
    match (&position as &dyn Any).downcast_ref::<K>() {
        Some(key) => *key,
        None => fail_fast(Violation::TypeMismatch {
            expected: "u64",
            found: std::any::type_name::<K>(),
        }),
    }
}

impl Drop for DataBlock {
    fn drop(&mut self) {
        let columns = *self.columns.get_mut();
        // SAFETY: created by `Box::into_raw` and exclusively owned here.
        drop(unsafe { Box::from_raw(columns) });
    }
}

impl fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBlock")
            .field("rows", &self.row_count())
            .field("capacity", &self.row_capacity())
            .field("columns", &self.column_count)
            .field("key_mode", &self.key_mode)
            .field("keys", &self.key_tag)
            .field("values", &self.value_tag)
            .finish()
    }
}

// ── BlockRef ───────────────────────────────────────────────────────

/// A shared reference to a block.
///
/// Cloning adds one holder, dropping removes one; the last drop releases
/// every column buffer, retired ones included.
#[derive(Clone)]
pub struct BlockRef(Arc<DataBlock>);

impl BlockRef {
    /// Share a new block.
    pub fn new(block: DataBlock) -> Self {
        Self(Arc::new(block))
    }

    /// Current number of holders.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether both references point at the same block.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<DataBlock> for BlockRef {
    fn from(block: DataBlock) -> Self {
        Self::new(block)
    }
}

impl Deref for BlockRef {
    type Target = DataBlock;

    fn deref(&self) -> &DataBlock {
        &self.0
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockRef").field(&*self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PooledSource;
    use skein_buffers::{BufferError, RetainableMemory};
    use skein_core::OrdComparer;
    use std::sync::atomic::AtomicU64;
    use std::thread;

    fn series(capacity: usize) -> DataBlock {
        DataBlock::create_for_series::<u64, f64, _>(capacity, &PooledSource).unwrap()
    }

    /// Lets the key column through, then refuses; remembers what it handed
    /// out so tests can check it was released.
    #[derive(Default)]
    struct FailValues {
        handed_out: Mutex<Vec<Arc<RetainableMemory<u64>>>>,
    }

    impl BufferSource for FailValues {
        fn allocate<T: Element>(&self, len: usize) -> Result<RetainedVec, BufferError> {
            let vec = PooledSource.allocate::<T>(len)?;
            let handle: &dyn Any = vec.handle::<T>();
            match handle.downcast_ref::<Retained<u64>>() {
                Some(keys) => {
                    self.handed_out
                        .lock()
                        .unwrap()
                        .push(Arc::clone(keys.memory()));
                    Ok(vec)
                }
                None => Err(BufferError::AllocationFailed { requested: len }),
            }
        }
    }

    #[test]
    fn append_publishes_rows() {
        let block = series(4);
        assert!(block.is_empty());
        block.append(10u64, 1.5f64);
        block.append(20u64, 2.5f64);
        assert_eq!(block.row_count(), 2);
        assert_eq!(block.key_at::<u64>(1), 20);
        assert_eq!(block.value_at::<f64>(0), 1.5);
        assert_eq!(block.row_at::<u64, f64>(1), (20, 2.5));
        assert_eq!(block.first_key::<u64>(), Some(10));
        assert_eq!(block.last_key::<u64>(), Some(20));
    }

    #[test]
    fn try_append_on_full_block_leaves_it_untouched() {
        let block = series(2);
        assert!(block.try_append(1u64, 1.0f64));
        assert!(block.try_append(2u64, 2.0f64));
        assert!(block.is_full());
        assert!(!block.try_append(3u64, 3.0f64));
        assert_eq!(block.row_count(), 2);
        assert_eq!(block.last_key::<u64>(), Some(2));
    }

    #[test]
    #[should_panic(expected = "append to a full block")]
    fn append_on_full_block_fails_fast() {
        let block = series(1);
        block.append(1u64, 1.0f64);
        block.append(2u64, 2.0f64);
    }

    #[test]
    fn grow_copies_rows_and_retires_old_columns() {
        let block = series(4);
        for i in 0..4u64 {
            block.append(i, i as f64 * 10.0);
        }
        let old_values = block.values::<f64>();
        let capacity = block.grow::<u64, f64, _>(5, &PooledSource).unwrap();
        assert_eq!(capacity, 16);
        assert_eq!(block.row_capacity(), 16);
        assert_eq!(block.retired_columns(), 1);
        for i in 0..4u64 {
            assert_eq!(block.row_at::<u64, f64>(i as usize), (i, i as f64 * 10.0));
        }
        assert!(!old_values.memory().is_disposed());
        block.append(4u64, 40.0f64);
        assert_eq!(block.row_count(), 5);
        drop(old_values);
    }

    #[test]
    fn grow_rounds_to_power_of_two() {
        let block = series(16);
        assert_eq!(block.grow::<u64, f64, _>(0, &PooledSource).unwrap(), 32);
        assert_eq!(block.grow::<u64, f64, _>(100, &PooledSource).unwrap(), 128);
    }

    #[test]
    fn failed_grow_releases_partial_buffers_and_keeps_state() {
        let block = series(2);
        block.append(1u64, 1.0f64);
        block.append(2u64, 2.0f64);
        let source = FailValues::default();
        let err = block.grow::<u64, f64, _>(64, &source).unwrap_err();
        assert!(matches!(err, BlockError::AllocationFailed { requested_rows: 64, .. }));
        assert_eq!(block.row_count(), 2);
        assert_eq!(block.row_capacity(), 2);
        assert_eq!(block.retired_columns(), 0);
        assert_eq!(block.row_at::<u64, f64>(1), (2, 2.0));
        let handed_out = source.handed_out.lock().unwrap();
        assert_eq!(handed_out.len(), 1);
        assert!(handed_out[0].is_disposed());
    }

    #[test]
    fn vector_keys_are_positions() {
        let block = DataBlock::create_for_vector::<i32, _>(8, 100, &PooledSource).unwrap();
        block.append_value(7i32);
        block.append_value(8i32);
        assert_eq!(block.key_mode(), KeyMode::Implicit);
        assert_eq!(block.row_at::<u64, i32>(1), (101, 8));
        assert_eq!(
            block.search_key(&101u64, Lookup::Eq, &OrdComparer),
            Some(1)
        );
        assert_eq!(block.grow::<u64, i32, _>(9, &PooledSource).unwrap(), 16);
        assert_eq!(block.value_at::<i32>(0), 7);
    }

    #[test]
    #[should_panic(expected = "key mode mismatch")]
    fn append_value_on_series_fails_fast() {
        let block = series(4);
        block.append_value(1.0f64);
    }

    #[test]
    fn panel_rows_round_trip_through_columns() {
        let block = DataBlock::create_for_panel::<u32, f32, _>(4, 3, &PooledSource).unwrap();
        block.append_row(1u32, &[1.0f32, 2.0, 3.0]);
        block.append_row(2u32, &[4.0f32, 5.0, 6.0]);
        assert_eq!(block.panel_value_at::<f32>(1, 2), 6.0);
        assert_eq!(block.row_values::<f32>(0).as_slice(), &[1.0, 2.0, 3.0]);
        block.grow::<u32, f32, _>(8, &PooledSource).unwrap();
        assert_eq!(block.row_values::<f32>(1).as_slice(), &[4.0, 5.0, 6.0]);
    }

    #[test]
    #[should_panic(expected = "row has 2 columns, block has 3")]
    fn short_panel_row_fails_fast() {
        let block = DataBlock::create_for_panel::<u32, f32, _>(4, 3, &PooledSource).unwrap();
        block.append_row(1u32, &[1.0f32, 2.0]);
    }

    #[test]
    #[should_panic(expected = "element type mismatch")]
    fn wrong_value_type_fails_fast() {
        let block = series(4);
        block.append(1u64, 1.0f32);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn reading_unpublished_row_fails_fast() {
        let block = series(4);
        block.append(1u64, 1.0f64);
        let _ = block.key_at::<u64>(1);
    }

    #[test]
    #[should_panic(expected = "concurrent writers")]
    fn second_writer_fails_fast() {
        let block = series(4);
        let _section = block.enter_write();
        block.append(1u64, 1.0f64);
    }

    #[test]
    fn overwrite_and_insert_mutate_published_rows() {
        let block = series(8);
        block.append(10u64, 1.0f64);
        block.append(30u64, 3.0f64);
        assert!(block.insert(1, 20u64, 2.0f64));
        assert_eq!(block.row_count(), 3);
        assert_eq!(block.row_at::<u64, f64>(1), (20, 2.0));
        assert_eq!(block.row_at::<u64, f64>(2), (30, 3.0));
        block.overwrite(0, 5u64, 0.5f64);
        assert_eq!(block.row_at::<u64, f64>(0), (5, 0.5));
        assert!(block.insert(3, 40u64, 4.0f64));
        assert_eq!(block.last_key::<u64>(), Some(40));
    }

    #[test]
    fn search_key_honours_lookup() {
        let block = series(8);
        for k in [10u64, 20, 30] {
            block.append(k, 0.0f64);
        }
        let cmp = OrdComparer;
        assert_eq!(block.search_key(&20u64, Lookup::Eq, &cmp), Some(1));
        assert_eq!(block.search_key(&25u64, Lookup::Le, &cmp), Some(1));
        assert_eq!(block.search_key(&25u64, Lookup::Ge, &cmp), Some(2));
        assert_eq!(block.search_key(&30u64, Lookup::Gt, &cmp), None);
        assert_eq!(block.search_key(&10u64, Lookup::Lt, &cmp), None);
    }

    #[test]
    fn block_ref_counts_holders_and_releases_buffers() {
        let block = BlockRef::new(series(4));
        block.append(1u64, 1.0f64);
        block.grow::<u64, f64, _>(0, &PooledSource).unwrap();
        let values = block.values::<f64>();
        let memory = Arc::clone(values.memory());
        drop(values);

        let other = block.clone();
        assert_eq!(block.ref_count(), 2);
        assert!(other.ptr_eq(&block));
        drop(other);
        assert_eq!(block.ref_count(), 1);
        assert!(!memory.is_disposed());
        drop(block);
        assert!(memory.is_disposed());
    }

    #[test]
    fn readers_never_see_partial_rows_while_writer_grows() {
        const ROWS: u64 = 5_000;
        let block = BlockRef::new(series(16));
        let seen = Arc::new(AtomicU64::new(0));
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let block = block.clone();
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    while block.row_count() < ROWS as usize {
                        let rows = block.row_count();
                        for i in 0..rows {
                            let (k, v) = block.row_at::<u64, f64>(i);
                            assert_eq!(k, i as u64);
                            assert_eq!(v, k as f64 * 2.0);
                        }
                        seen.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for k in 0..ROWS {
            if block.is_full() {
                block.grow::<u64, f64, _>(0, &PooledSource).unwrap();
            }
            block.append(k, k as f64 * 2.0);
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(block.row_count(), ROWS as usize);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn appended_rows_survive_any_growth_schedule(
                keys in proptest::collection::vec(any::<u32>(), 1..200),
                start in 1usize..8,
            ) {
                let block = DataBlock::create_for_series::<u32, i64, _>(start, &PooledSource).unwrap();
                for (i, &k) in keys.iter().enumerate() {
                    if !block.try_append(k, i as i64) {
                        block.grow::<u32, i64, _>(0, &PooledSource).unwrap();
                        block.append(k, i as i64);
                    }
                }
                prop_assert_eq!(block.row_count(), keys.len());
                prop_assert!(block.row_capacity().is_power_of_two() || block.row_capacity() == start);
                for (i, &k) in keys.iter().enumerate() {
                    prop_assert_eq!(block.row_at::<u32, i64>(i), (k, i as i64));
                }
            }
        }
    }
}
