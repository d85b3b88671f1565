//! Structured logging initialization.
//!
//! `observability_deps::tracing` is used throughout the workspace; this binary is the one
//! place that decides how those events are rendered, via `tracing-subscriber`'s env filter.

use observability_deps::tracing::info;
use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber. `RUST_LOG` (or `info` if unset) controls verbosity.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("logging initialized");
}
