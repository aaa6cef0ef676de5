//! Logging initialisation (`tracing` + `tracing-subscriber`).
//!
//! The level filter comes from `RUST_LOG` and defaults to `info`, e.g.
//! `RUST_LOG=dofusdb_ingest=debug` to see every collected page.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber for the CLI. Logs go to stderr so that
/// JSON output on stdout stays pipeable.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Subscriber for tests: verbose, captured by the test harness.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
