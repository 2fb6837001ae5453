//! Logging setup for binaries and tests embedding evidra

use tracing_subscriber::{fmt, EnvFilter};

/// Install a fmt subscriber filtered by `RUST_LOG`, defaulting to `evidra=info`
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("evidra=info"));

    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
