//! Agent Bus
//!
//! A process-wide message bus. Agents (in-process handlers, child processes,
//! local socket connections) register under unique names, subscribe to each
//! other and exchange JSON payloads by broadcast or point-to-point delivery.
//!
//! # Example
//!
//! ```no_run
//! use agent_bus::{Bus, BusAgent};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = Bus::new();
//!
//!     let server = bus.create_local_server_agent("document-viewer", None).await?;
//!     let mut monitor = bus.create_mailbox_agent(Some("monitor"))?;
//!     monitor.subscribe();
//!
//!     monitor.send_to(&server, json!({"text": "Hello!"}));
//!
//!     while let Some(message) = monitor.recv().await {
//!         println!("{} -> {:?}: {}", message.from, message.to, message.data);
//!     }
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod bus;
pub mod codec;
pub mod error;
pub mod message;
pub mod process;
pub mod registry;
pub mod script;
pub mod subscription;
mod transport;

// Local server transport (Unix domain sockets)
#[cfg(unix)]
pub mod local_server;

// Re-exports
pub use agent::{BusAgent, CallbackAgent, Inbox, MailboxAgent};
pub use bus::{Bus, WeakBus};
pub use codec::{Command, Inbound};
pub use error::{BusError, Result};
pub use message::BusMessage;
pub use registry::{AgentInfo, AgentKind};
pub use script::{script_command, script_environment, ScriptRuntime, SubprocessRuntime};
pub use subscription::{Source, Subscription, SubscriptionTable};

pub use bus_core::{BusConfig, BusSettings, DirectDelivery, ScriptHostConfig};
