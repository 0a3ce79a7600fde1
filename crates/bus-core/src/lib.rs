//! Bus Core
//!
//! Error handling, configuration and logging setup shared by the agent bus
//! and its host binary.

pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{
    load_config, load_config_or_default, BusConfig, BusSettings, ChildAgentSpec, DirectDelivery,
    LoggingConfig, ScriptHostConfig,
};
pub use error::{CoreError, Result};
pub use logging::{init_logging, LogConfig};
