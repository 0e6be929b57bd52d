//! Structured Logger
//! Mission: process-wide, level-filtered structured logging. A thin facade
//! over `tracing` so call sites elsewhere in the codebase read like ordinary
//! `tracing` macro calls, while the underlying sink stays swappable.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the process-wide subscriber. Call exactly once, from `main`.
///
/// Filter defaults to `info` for this crate and `warn` for dependencies,
/// overridable via `RUST_LOG`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,regulens_backend=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub use tracing::{debug, error, info, trace, warn};
