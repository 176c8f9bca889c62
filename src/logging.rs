//! Tracing setup for binaries and tests.
//!
//! The library only emits `tracing` events. Call [`init_tracing`] once from a
//! binary (or a test) to print them; the filter is read from `RUST_LOG` and
//! defaults to `info`.

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber. Later calls are no-ops.
pub fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .try_init();
}

/// Like [`init_tracing`], writing through the test harness's captured output.
pub fn init_test_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::new("debug"))
    .with_test_writer()
    .try_init();
}
