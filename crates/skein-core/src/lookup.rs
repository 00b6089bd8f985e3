//! Key search semantics.

use std::cmp::Ordering;

/// Which position a key search resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lookup {
    /// The position holding exactly the key.
    Eq,
    /// The last position with a key strictly less than the search key.
    Lt,
    /// The last position with a key less than or equal to the search key.
    Le,
    /// The first position with a key greater than or equal to the search key.
    Ge,
    /// The first position with a key strictly greater than the search key.
    Gt,
}

impl Lookup {
    /// Whether a miss in one block should continue in later blocks.
    pub fn searches_forward(self) -> bool {
        matches!(self, Self::Ge | Self::Gt | Self::Eq)
    }
}

/// Total order over keys of type `K`.
pub trait KeyComparer<K>: Send + Sync {
    /// Compare two keys.
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// [`KeyComparer`] using the key's [`Ord`] implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrdComparer;

impl<K: Ord> KeyComparer<K> for OrdComparer {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// First index in `0..len` for which `pred` is false, assuming `pred` is
/// true for a prefix and false for the rest.
fn partition_point(len: usize, mut pred: impl FnMut(usize) -> bool) -> usize {
    let (mut lo, mut hi) = (0, len);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Binary search over `len` sorted keys read through `key_at`.
///
/// Returns the index selected by `lookup`, or `None` when no key
/// qualifies.
pub fn search<K>(
    len: usize,
    mut key_at: impl FnMut(usize) -> K,
    key: &K,
    lookup: Lookup,
    comparer: &dyn KeyComparer<K>,
) -> Option<usize> {
    let lower = partition_point(len, |i| comparer.compare(&key_at(i), key) == Ordering::Less);
    match lookup {
        Lookup::Eq => (lower < len && comparer.compare(&key_at(lower), key) == Ordering::Equal)
            .then_some(lower),
        Lookup::Ge => (lower < len).then_some(lower),
        Lookup::Lt => lower.checked_sub(1),
        Lookup::Gt | Lookup::Le => {
            let upper =
                partition_point(len, |i| comparer.compare(&key_at(i), key) != Ordering::Greater);
            if lookup == Lookup::Gt {
                (upper < len).then_some(upper)
            } else {
                upper.checked_sub(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(keys: &[i64], key: i64, lookup: Lookup) -> Option<usize> {
        search(keys.len(), |i| keys[i], &key, lookup, &OrdComparer)
    }

    #[test]
    fn exact_hit_and_miss() {
        let keys = [10, 20, 30];
        assert_eq!(find(&keys, 20, Lookup::Eq), Some(1));
        assert_eq!(find(&keys, 25, Lookup::Eq), None);
    }

    #[test]
    fn nearest_lookups_between_keys() {
        let keys = [10, 20, 30];
        assert_eq!(find(&keys, 25, Lookup::Lt), Some(1));
        assert_eq!(find(&keys, 25, Lookup::Le), Some(1));
        assert_eq!(find(&keys, 25, Lookup::Ge), Some(2));
        assert_eq!(find(&keys, 25, Lookup::Gt), Some(2));
    }

    #[test]
    fn nearest_lookups_on_a_key() {
        let keys = [10, 20, 30];
        assert_eq!(find(&keys, 20, Lookup::Lt), Some(0));
        assert_eq!(find(&keys, 20, Lookup::Le), Some(1));
        assert_eq!(find(&keys, 20, Lookup::Ge), Some(1));
        assert_eq!(find(&keys, 20, Lookup::Gt), Some(2));
    }

    #[test]
    fn out_of_range() {
        let keys = [10, 20, 30];
        assert_eq!(find(&keys, 5, Lookup::Lt), None);
        assert_eq!(find(&keys, 5, Lookup::Ge), Some(0));
        assert_eq!(find(&keys, 35, Lookup::Gt), None);
        assert_eq!(find(&keys, 35, Lookup::Le), Some(2));
        assert_eq!(find(&[], 1, Lookup::Le), None);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn matches_linear_scan(
                mut keys in proptest::collection::vec(-50i64..50, 0..40),
                key in -60i64..60,
            ) {
                keys.sort_unstable();
                keys.dedup();
                let le = keys.iter().rposition(|&k| k <= key);
                let lt = keys.iter().rposition(|&k| k < key);
                let ge = keys.iter().position(|&k| k >= key);
                let gt = keys.iter().position(|&k| k > key);
                let eq = keys.iter().position(|&k| k == key);
                prop_assert_eq!(find(&keys, key, Lookup::Le), le);
                prop_assert_eq!(find(&keys, key, Lookup::Lt), lt);
                prop_assert_eq!(find(&keys, key, Lookup::Ge), ge);
                prop_assert_eq!(find(&keys, key, Lookup::Gt), gt);
                prop_assert_eq!(find(&keys, key, Lookup::Eq), eq);
            }
        }
    }
}
