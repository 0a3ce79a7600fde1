//! Bus messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message routed by the bus
///
/// This is also the record written, one JSON object per line, to child
/// processes and socket connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Message ID
    pub id: String,

    /// Sending agent name
    pub from: String,

    /// Recipient agent name (None for broadcast)
    pub to: Option<String>,

    /// Message payload
    pub data: Value,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl BusMessage {
    /// Create a point-to-point message
    pub fn direct(from: impl Into<String>, to: impl Into<String>, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to: Some(to.into()),
            data,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create a broadcast message
    pub fn broadcast(from: impl Into<String>, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to: None,
            data,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }
}
