//! The synchronous advance an async wait is built on.

use skein_block::{Container, Element};

use crate::cursor::BlockCursor;
use crate::error::OutOfOrderKey;

/// A cursor that can try to advance without blocking.
pub trait AdvanceCursor: Send {
    /// Failure raised by an advance, delivered once to the waiter.
    type Error: Send + 'static;

    /// Advance one row. `Ok(false)` when no row is available yet.
    fn try_move_next(&mut self) -> Result<bool, Self::Error>;

    /// Whether the source will never produce more rows.
    fn is_source_completed(&self) -> bool;
}

impl<K, V, S> AdvanceCursor for BlockCursor<K, V, S>
where
    K: Element,
    V: Element,
    S: Container<K> + ?Sized,
{
    type Error = OutOfOrderKey<K>;

    fn try_move_next(&mut self) -> Result<bool, OutOfOrderKey<K>> {
        self.move_next()
    }

    fn is_source_completed(&self) -> bool {
        self.source()
            .is_some_and(|source| source.versions().is_completed())
    }
}
