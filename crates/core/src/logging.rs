//! Structured logging setup.
//!
//! Libraries in this workspace only emit `tracing` events; binaries and tests
//! choose a subscriber through this module.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize human-readable logging.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use provenance_core::logging;
///
/// logging::init();
/// tracing::info!("Verifier started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize JSON logging for log aggregation.
///
/// # Example
/// ```no_run
/// use provenance_core::logging;
///
/// logging::init_json();
/// tracing::info!(component = "sync", "Service started");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Like [`init`], but writes to stderr and returns quietly if a subscriber is
/// already installed. Used by command-line tools whose stdout is data.
pub fn try_init() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init();
}
