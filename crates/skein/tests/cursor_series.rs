//! Cursors over a live `TestSeries`: traversal, lookup, out-of-order
//! recovery and block reference accounting.

use std::sync::Arc;

use skein::prelude::*;
use skein_test_utils::TestSeries;

fn series(keys: impl IntoIterator<Item = u64>, block_rows: usize) -> Arc<TestSeries<u64, f64>> {
    let series = TestSeries::new(block_rows);
    for key in keys {
        series.append(key, key as f64 / 2.0).unwrap();
    }
    series
}

#[test]
fn forward_scan_sees_every_row_in_order() {
    let series = series((0..50).map(|i| i * 3), 8);
    let mut cursor = series.cursor();
    let mut keys = Vec::new();
    while cursor.move_next().unwrap() {
        let key = cursor.current_key().unwrap();
        assert_eq!(cursor.current_value(), Some(key as f64 / 2.0));
        keys.push(key);
    }
    assert_eq!(keys, (0..50).map(|i| i * 3).collect::<Vec<_>>());
}

#[test]
fn backward_scan_mirrors_forward() {
    let series = series(0..20, 6);
    let mut cursor = series.cursor();
    let mut keys = Vec::new();
    while cursor.move_previous().unwrap() {
        keys.push(cursor.current_key().unwrap());
    }
    assert_eq!(keys, (0..20).rev().collect::<Vec<_>>());
}

#[test]
fn rows_appended_after_exhaustion_are_picked_up() {
    let series = series(0..4, 4);
    let mut cursor = series.cursor();
    for _ in 0..4 {
        assert!(cursor.move_next().unwrap());
    }
    assert!(!cursor.move_next().unwrap());
    assert_eq!(cursor.current_key(), Some(3));

    series.append(4, 2.0).unwrap();
    assert_eq!(series.blocks().len(), 2);
    assert!(cursor.move_next().unwrap());
    assert_eq!(cursor.current_key(), Some(4));
}

#[test]
fn strides_clamp_only_when_partial() {
    let series = series(0..10, 3);
    let mut cursor = series.cursor();
    assert_eq!(cursor.move_by(4, false).unwrap(), 4);
    assert_eq!(cursor.current_key(), Some(3));
    assert_eq!(cursor.move_by(10, false).unwrap(), 0);
    assert_eq!(cursor.current_key(), Some(3));
    assert_eq!(cursor.move_by(10, true).unwrap(), 6);
    assert_eq!(cursor.current_key(), Some(9));
    assert_eq!(cursor.move_by(-9, false).unwrap(), -9);
    assert_eq!(cursor.current_key(), Some(0));
}

#[test]
fn move_at_resolves_across_block_boundaries() {
    let series = series([1, 3, 5, 7, 9], 2);
    let mut cursor = series.cursor();
    assert!(cursor.move_at(&4, Lookup::Ge));
    assert_eq!(cursor.current_key(), Some(5));
    assert!(cursor.move_at(&4, Lookup::Le));
    assert_eq!(cursor.current_key(), Some(3));
    assert!(cursor.move_previous().unwrap());
    assert_eq!(cursor.current_key(), Some(1));
    assert!(!cursor.move_at(&10, Lookup::Gt));
    assert_eq!(cursor.current_key(), Some(1));
    assert!(cursor.move_last());
    assert_eq!(cursor.current_key(), Some(9));
    assert!(cursor.move_first());
    assert_eq!(cursor.current_key(), Some(1));
}

#[test]
fn out_of_order_insert_strands_cursor_until_repositioned() {
    let series = series([10, 20, 30, 40], 8);
    let mut cursor = series.cursor();
    assert!(cursor.move_next().unwrap());
    assert!(cursor.move_next().unwrap());

    series.append(25, 12.5).unwrap();
    let err = cursor.move_next().unwrap_err();
    assert_eq!(err.key(), Some(&20));
    assert_eq!(cursor.current_key(), Some(20));
    assert!(cursor.move_next().is_err());
    assert_eq!(cursor.current_key(), Some(20));

    assert!(cursor.move_at(&20, Lookup::Eq));
    assert!(cursor.move_next().unwrap());
    assert_eq!(cursor.current_key(), Some(25));
    assert_eq!(cursor.current_value(), Some(12.5));
}

#[test]
fn order_bump_before_first_move_aborts() {
    let series = series(0..4, 4);
    let mut cursor = series.cursor();
    series.append(0, 0.0).unwrap();
    let err = cursor.move_next().unwrap_err();
    assert_eq!(err.into_key(), None);
    cursor.reset();
    assert!(cursor.move_next().unwrap());
}

#[test]
fn clone_and_dispose_balance_block_references() {
    let series = series(0..4, 4);
    let mut cursor = series.cursor();
    assert!(cursor.move_next().unwrap());
    let block = cursor.current_block().unwrap().clone();
    let base = block.ref_count();

    let mut copy = cursor.clone();
    assert_eq!(block.ref_count(), base + 1);
    assert_eq!(copy.current_key(), cursor.current_key());
    copy.dispose();
    assert_eq!(block.ref_count(), base);
    assert_eq!(copy.state(), CursorState::Disposed);

    drop(cursor);
    assert_eq!(block.ref_count(), base - 1);
}

#[test]
#[should_panic(expected = "cursor used after dispose")]
fn second_dispose_fails_fast() {
    let series = series(0..2, 4);
    let mut cursor = series.cursor();
    cursor.dispose();
    cursor.dispose();
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn scan_after_reset_is_sorted(
            keys in proptest::collection::vec(0u64..500, 1..120),
            block_rows in 1usize..10,
        ) {
            let series = TestSeries::<u64, f64>::new(block_rows);
            for &key in &keys {
                series.append(key, key as f64).unwrap();
            }
            let mut cursor = series.cursor();
            cursor.reset();
            let mut seen = Vec::new();
            while cursor.move_next().unwrap() {
                seen.push(cursor.current_key().unwrap());
            }
            let mut expected = keys.clone();
            expected.sort_unstable();
            prop_assert_eq!(seen, expected);
        }
    }
}
