//! Test containers and fixtures for skein development.
//!
//! - [`TestSeries`]: a minimal append-only series that owns a block chain
//!   and implements [`Container`](skein_block::Container), so cursors
//!   can be driven against real blocks.
//! - [`FailingSource`] and [`CountingWaker`]: fault injection for growth
//!   and wake accounting for async waits.
//! - [`init_tracing`]: route `tracing` output to the test harness.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;
pub mod series;

pub use fixtures::{counting_waker, CountingWaker, FailingSource};
pub use series::TestSeries;

use std::sync::Once;

use tracing_subscriber::{fmt, EnvFilter};

/// Install a test-writer subscriber once per process. Filter with
/// `RUST_LOG`; defaults to `warn`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
