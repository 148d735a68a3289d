//! Process-wide log subscriber setup.
//!
//! Library code logs through the `log` macros and opens `tracing` spans;
//! `init_logging` routes both into one `tracing_subscriber` registry.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Fails if a subscriber or `log` logger is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = build_filter(&config.level, std::env::var("RUST_LOG").ok().as_deref())?;

    let (plain, json) = if config.json {
        (None, Some(fmt::layer().json().with_current_span(true)))
    } else {
        (Some(fmt::layer().with_target(true)), None)
    };

    let subscriber = Registry::default().with(filter).with(plain).with(json);

    tracing_log::LogTracer::init().map_err(|e| ConfigError::Logging(e.to_string()))?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(())
}

fn build_filter(level: &str, env: Option<&str>) -> Result<EnvFilter, ConfigError> {
    if let Some(directives) = env.filter(|d| !d.trim().is_empty()) {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return Ok(filter);
        }
    }
    EnvFilter::try_new(level)
        .map_err(|e| ConfigError::Logging(format!("invalid log level '{}': {}", level, e)))
}
