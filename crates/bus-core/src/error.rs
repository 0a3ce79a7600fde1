//! Error types shared across the bus crates
//!
//! Configuration loading and logging setup report failures through
//! [`CoreError`]. Higher layers wrap it in their own error enums.

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration parsing errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] config::ConfigError),

    /// A setting that parsed but cannot be used
    #[error("Invalid setting `{key}`: {reason}")]
    InvalidSetting { key: String, reason: String },
}

impl CoreError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_setting<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
