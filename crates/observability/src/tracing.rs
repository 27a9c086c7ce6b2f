//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process with the default `RUST_LOG` filter.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
}

/// Initialize tracing with an explicit filter.
///
/// Useful in tests that want `debug` output for one crate without touching
/// the process environment.
pub fn init_with_filter(filter: EnvFilter) {
    // JSON logs + timestamps; inventory spans carry the stock key as a field.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
