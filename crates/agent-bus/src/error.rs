//! Error types for the agent bus
//!
//! Only agent creation and script evaluation fail loudly. Undeliverable
//! messages are dropped, never reported as errors.

use bus_core::CoreError;
use std::path::PathBuf;

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised by the bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Name already held by a registered agent
    #[error("Agent name already registered: {0}")]
    NameTaken(String),

    /// Caller-supplied name is unusable
    #[error("Invalid agent name: {0:?}")]
    InvalidName(String),

    /// Child process could not be started
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A live server already listens under this name
    #[error("Local server already bound at {}", .0.display())]
    AlreadyBound(PathBuf),

    /// Listening socket could not be created
    #[error("Failed to bind local server at {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transport not available on this platform
    #[error("Unsupported on this platform: {0}")]
    Unsupported(&'static str),

    /// Script host or evaluation failure
    #[error("Script error: {0}")]
    Script(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from bus-core
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl BusError {
    /// Create a script error
    pub fn script<S: Into<String>>(msg: S) -> Self {
        Self::Script(msg.into())
    }

    /// Create a spawn error for `program`
    pub fn spawn<S: Into<String>>(program: S, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_message() {
        let err = BusError::spawn(
            "/bin/missing",
            std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        );
        assert!(err.to_string().contains("/bin/missing"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_already_bound_message() {
        let err = BusError::AlreadyBound(PathBuf::from("/tmp/svc"));
        assert_eq!(err.to_string(), "Local server already bound at /tmp/svc");
    }
}
