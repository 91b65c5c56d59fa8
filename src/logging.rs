//! Tracing initialization for embedding applications.

use tracing_subscriber::EnvFilter;

/// Initialize a stderr tracing subscriber honoring `RUST_LOG`.
///
/// Embedders with their own subscriber should skip this and let engine spans
/// flow into their setup. Safe to call once per process; returns quietly if a
/// global subscriber is already installed.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
