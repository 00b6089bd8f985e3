//! Contracts between blocks, the chain that links them and the readers
//! that walk it.

use skein_core::{ContainerVersions, KeyComparer, Lookup};

use crate::block::BlockRef;

/// Navigation over an ordered chain of blocks.
///
/// Every method returns `None` at the chain ends. Implementations may be
/// called while a writer is restructuring the chain; readers validate
/// what they computed against [`Container::versions`] afterwards, so
/// an accessor only has to return *some* block that was part of the
/// chain, not a consistent snapshot.
pub trait ChainAccessor<K>: Send + Sync {
    /// The first block.
    fn first_block(&self) -> Option<BlockRef>;

    /// The last block.
    fn last_block(&self) -> Option<BlockRef>;

    /// The block after `block`.
    fn next_block(&self, block: &BlockRef) -> Option<BlockRef>;

    /// The block before `block`.
    fn previous_block(&self, block: &BlockRef) -> Option<BlockRef>;

    /// The block and row selected by `lookup` relative to `key`.
    fn find_block_at(&self, key: &K, lookup: Lookup) -> Option<(BlockRef, usize)>;
}

/// A keyed container readers can traverse without locks.
pub trait Container<K>: ChainAccessor<K> {
    /// Version counters guarding the chain and its blocks.
    fn versions(&self) -> &ContainerVersions;

    /// Key order of the container.
    fn comparer(&self) -> &dyn KeyComparer<K>;
}
