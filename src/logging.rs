//! Structured logging
//!
//! `tracing` subscriber setup. The filter comes from `FIXTUREGRES_LOG`, then
//! `RUST_LOG`, then defaults to `info`.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("FIXTUREGRES_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber; later calls are no-ops
pub fn init_logging(json: bool) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let registry = tracing_subscriber::registry();
        let result = if json {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_writer(std::io::stderr)
                        .with_filter(env_filter()),
                )
                .try_init()
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_writer(std::io::stderr)
                        .with_filter(env_filter()),
                )
                .try_init()
        };

        // Another subscriber may already be installed (e.g. by a test harness)
        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }
    });
}

/// Logging for tests: output captured per test by the test harness
pub fn init_test_logging() {
    let _ = fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .try_init();
}
