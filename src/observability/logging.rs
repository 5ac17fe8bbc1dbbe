//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Take the level from config unless `RUST_LOG` overrides it

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global subscriber filtered at `level`.
///
/// Fails if a global subscriber is already set.
pub fn init(level: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level)))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
}

/// Filter for `level`, keeping the connection pool quiet below debug.
fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("{level},hyper=warn,hyper_util=warn,rustls=warn"))
}
