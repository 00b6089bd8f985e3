//! Benchmark profiles for skein.
//!
//! - [`filled_series`]: a [`TestSeries`] of `rows` sequential rows in
//!   blocks of `block_rows`.
//! - [`REFERENCE_ROWS`] / [`REFERENCE_BLOCK_ROWS`]: the shape used by the
//!   cursor benches.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;

use skein_test_utils::TestSeries;

/// Rows in the reference series.
pub const REFERENCE_ROWS: u64 = 100_000;

/// Rows per block in the reference series.
pub const REFERENCE_BLOCK_ROWS: usize = 1024;

/// A series with keys `0..rows` and values equal to the key.
pub fn filled_series(rows: u64, block_rows: usize) -> Arc<TestSeries<u64, f64>> {
    let series = TestSeries::new(block_rows);
    for key in 0..rows {
        // The default pool only fails on length overflow.
        if series.append(key, key as f64).is_err() {
            break;
        }
    }
    series
}
