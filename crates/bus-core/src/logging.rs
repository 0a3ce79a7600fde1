//! Logging setup for bus hosts
//!
//! Structured logging through `tracing`, with an `EnvFilter` so `RUST_LOG`
//! overrides the configured level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (e.g., "info", "debug", "agent_bus=trace")
    pub level: String,
    /// Whether to use JSON format (vs. human-readable)
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            level: config.level.clone(),
            json: config.json,
        }
    }
}

/// Initialize logging for the application
///
/// Installs a global tracing subscriber. Call once at startup; later calls
/// are ignored with a warning.
///
/// # Example
///
/// ```
/// use bus_core::logging::{init_logging, LogConfig};
///
/// init_logging(LogConfig {
///     level: "debug".to_string(),
///     json: false,
/// });
/// ```
pub fn init_logging(config: LogConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .try_init()
    };

    match result {
        Ok(()) => tracing::info!("Logging initialized at level: {}", config.level),
        Err(e) => tracing::warn!("Logging already initialized: {}", e),
    }
}
