// src/infra/logger.rs — Structured logging with tracing

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable that takes precedence over `RUST_LOG`.
pub const LOG_ENV: &str = "EDITSTREAM_LOG";

/// Build the filter: EDITSTREAM_LOG, then RUST_LOG, then the given level.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level))
}

pub fn init_logging(level: &str) {
    let _ = fmt()
        .with_env_filter(build_filter(level))
        .with_target(false)
        .compact()
        .try_init();
}
