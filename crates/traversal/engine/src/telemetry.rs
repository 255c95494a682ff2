//! Tracing subscriber setup for hosts embedding the engine

use crate::config::LoggingConfig;
use crate::error::{TraversalError, TraversalResult};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install a global subscriber: `RUST_LOG` when set, else the configured
/// level, with plain or JSON output.
pub fn init_tracing(config: &LoggingConfig) -> TraversalResult<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.level))
        .map_err(|e| TraversalError::Config(format!("Invalid log filter: {}", e)))?;

    let result = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    result.map_err(|e| TraversalError::Config(format!("Tracing already initialized: {}", e)))
}
