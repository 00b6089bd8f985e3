//! Error types for cursors.

use std::error::Error;
use std::fmt;

/// The container's key order was broken since the cursor was last
/// positioned.
///
/// Not retried: the cursor keeps its position and cached key, and stays
/// stranded until it is repositioned by key (`move_at`, `move_first` or
/// `move_last`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutOfOrderKey<K> {
    key: Option<K>,
}

impl<K> OutOfOrderKey<K> {
    /// An error for a cursor stranded at `key` (`None` if it was not
    /// positioned).
    pub fn new(key: Option<K>) -> Self {
        Self { key }
    }

    /// Key the cursor was stranded at.
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    /// Consume the error, returning the key.
    pub fn into_key(self) -> Option<K> {
        self.key
    }
}

impl<K: fmt::Debug> fmt::Display for OutOfOrderKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "out-of-order data detected at key {key:?}"),
            None => write!(f, "out-of-order data detected before the cursor was positioned"),
        }
    }
}

impl<K: fmt::Debug> Error for OutOfOrderKey<K> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_stranded_key() {
        let err = OutOfOrderKey::new(Some(42u64));
        assert_eq!(err.to_string(), "out-of-order data detected at key 42");
        assert_eq!(err.key(), Some(&42));
        assert_eq!(OutOfOrderKey::<u64>::new(None).into_key(), None);
    }
}
