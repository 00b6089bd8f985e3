//! An append-only series over a chain of [`DataBlock`]s.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, Weak};

use skein_block::{
    BlockError, BlockRef, BufferSource, ChainAccessor, Container, DataBlock, Element, PooledSource,
};
use skein_core::{ContainerVersions, KeyComparer, Lookup, OrdComparer};
use skein_cursor::{AsyncCursor, BlockCursor, Completer};

/// A series of `(K, V)` rows with one writer at a time.
///
/// Full blocks grow up to `max_block_rows`, then a new block is chained.
/// Structural edits (growth, a new block, out-of-order inserts) run under
/// a [`ContainerVersions`] write; plain appends publish through the block
/// row count alone. Subscribed completers are notified after every write
/// and on completion.
pub struct TestSeries<K, V, S = PooledSource> {
    blocks: RwLock<Vec<BlockRef>>,
    versions: ContainerVersions,
    writer: Mutex<()>,
    source: S,
    block_rows: usize,
    max_block_rows: usize,
    subscribers: Mutex<Vec<Weak<dyn Completer>>>,
    _rows: PhantomData<fn() -> (K, V)>,
}

impl<K: Element + Ord, V: Element> TestSeries<K, V> {
    /// Blocks of `block_rows` rows from the default pool, never grown.
    pub fn new(block_rows: usize) -> Arc<Self> {
        Self::with_source(block_rows, block_rows, PooledSource)
    }
}

impl<K, V, S> TestSeries<K, V, S>
where
    K: Element + Ord,
    V: Element,
    S: BufferSource,
{
    /// Blocks start at `block_rows` and grow to `max_block_rows`.
    pub fn with_source(block_rows: usize, max_block_rows: usize, source: S) -> Arc<Self> {
        Arc::new(Self {
            blocks: RwLock::new(Vec::new()),
            versions: ContainerVersions::new(),
            writer: Mutex::new(()),
            source,
            block_rows: block_rows.max(1),
            max_block_rows: max_block_rows.max(block_rows),
            subscribers: Mutex::new(Vec::new()),
            _rows: PhantomData,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<BlockRef>> {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn block_at(&self, position: usize) -> Option<BlockRef> {
        self.read().get(position).cloned()
    }

    /// Blocks in chain order.
    pub fn blocks(&self) -> Vec<BlockRef> {
        self.read().clone()
    }

    /// Published rows across all blocks.
    pub fn len(&self) -> usize {
        self.read().iter().map(|b| b.row_count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Append a row. Keys below the last key are inserted in order and
    /// break the order version.
    pub fn append(&self, key: K, value: V) -> Result<(), BlockError> {
        let result = self.append_locked(key, value);
        self.notify();
        result
    }

    fn append_locked(&self, key: K, value: V) -> Result<(), BlockError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let last = self.read().last().cloned();
        let Some(last) = last else {
            let _write = self.versions.begin_write();
            self.push_block(key, value)?;
            return Ok(());
        };
        if last.last_key::<K>().is_some_and(|k| k > key) {
            return self.insert_out_of_order(key, value);
        }
        if last.try_append(key, value) {
            return Ok(());
        }
        let _write = self.versions.begin_write();
        if last.row_capacity() < self.max_block_rows {
            last.grow::<K, V, S>(last.row_capacity() * 2, &self.source)?;
            last.append(key, value);
        } else {
            self.push_block(key, value)?;
        }
        Ok(())
    }

    fn push_block(&self, key: K, value: V) -> Result<(), BlockError> {
        let block = BlockRef::new(DataBlock::create_for_series::<K, V, S>(
            self.block_rows,
            &self.source,
        )?);
        block.append(key, value);
        let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        block.set_chain_index(blocks.len());
        tracing::debug!(position = blocks.len(), rows = self.block_rows, "block chained");
        blocks.push(block);
        Ok(())
    }

    fn insert_out_of_order(&self, key: K, value: V) -> Result<(), BlockError> {
        let mut write = self.versions.begin_write();
        write.mark_out_of_order();
        let (block, index) = match self.find_block_at(&key, Lookup::Ge) {
            Some(found) => found,
            // Unreachable while the last key is above `key`.
            None => return Ok(()),
        };
        if !block.insert(index, key, value) {
            block.grow::<K, V, S>(block.row_capacity() + 1, &self.source)?;
            block.insert(index, key, value);
        }
        Ok(())
    }

    /// Mark the series complete and wake every subscriber.
    pub fn complete(&self) {
        self.versions.complete();
        self.notify();
    }

    /// Notify `completer` after every future write.
    pub fn subscribe(&self, completer: &Arc<dyn Completer>) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(completer));
    }

    fn notify(&self) {
        let live: Vec<Arc<dyn Completer>> = {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers.retain(|s| s.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for completer in live {
            completer.try_complete();
        }
    }
}

impl<K, V, S> TestSeries<K, V, S>
where
    K: Element + Ord,
    V: Element,
    S: BufferSource + 'static,
{
    /// A cursor over this series.
    pub fn cursor(self: &Arc<Self>) -> BlockCursor<K, V, Self> {
        BlockCursor::new(Arc::clone(self))
    }

    /// An awaitable cursor, already subscribed.
    pub fn async_cursor(self: &Arc<Self>) -> AsyncCursor<BlockCursor<K, V, Self>> {
        let cursor = AsyncCursor::new(self.cursor());
        self.subscribe(&cursor.completer());
        cursor
    }
}

impl<K, V, S> ChainAccessor<K> for TestSeries<K, V, S>
where
    K: Element + Ord,
    V: Element,
    S: BufferSource,
{
    fn first_block(&self) -> Option<BlockRef> {
        self.block_at(0)
    }

    fn last_block(&self) -> Option<BlockRef> {
        self.read().last().cloned()
    }

    fn next_block(&self, block: &BlockRef) -> Option<BlockRef> {
        self.block_at(block.chain_index() + 1)
    }

    fn previous_block(&self, block: &BlockRef) -> Option<BlockRef> {
        block.chain_index().checked_sub(1).and_then(|p| self.block_at(p))
    }

    fn find_block_at(&self, key: &K, lookup: Lookup) -> Option<(BlockRef, usize)> {
        let blocks = self.read();
        let hit = |block: &BlockRef| {
            block
                .search_key(key, lookup, &OrdComparer)
                .map(|index| (block.clone(), index))
        };
        if lookup.searches_forward() {
            blocks.iter().find_map(hit)
        } else {
            blocks.iter().rev().find_map(hit)
        }
    }
}

impl<K, V, S> Container<K> for TestSeries<K, V, S>
where
    K: Element + Ord,
    V: Element,
    S: BufferSource,
{
    fn versions(&self) -> &ContainerVersions {
        &self.versions
    }

    fn comparer(&self) -> &dyn KeyComparer<K> {
        &OrdComparer
    }
}

impl<K, V, S> fmt::Debug for TestSeries<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSeries")
            .field("block_rows", &self.block_rows)
            .field("max_block_rows", &self.max_block_rows)
            .field("completed", &self.versions.is_completed())
            .finish()
    }
}
