//! In-process agents
//!
//! An agent is anything with an [`Inbox`] registered on the [`Bus`]. The
//! bus keeps only a weak reference; the handle types here own the inbox
//! and deregister on drop.

use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use crate::{AgentKind, Bus, BusMessage, Result, Source};

/// Delivery side of an agent
///
/// Called by the bus outside its lock, so implementations may call back
/// into the bus. Must not block.
pub trait Inbox: Send + Sync {
    fn deliver(&self, message: &BusMessage);
}

/// Inbox that forwards into an unbounded channel
pub(crate) struct ChannelInbox {
    tx: mpsc::UnboundedSender<BusMessage>,
}

impl ChannelInbox {
    pub fn new(tx: mpsc::UnboundedSender<BusMessage>) -> Self {
        Self { tx }
    }
}

impl Inbox for ChannelInbox {
    fn deliver(&self, message: &BusMessage) {
        if self.tx.send(message.clone()).is_err() {
            tracing::trace!("Dropping message {} for closed channel", message.id);
        }
    }
}

struct CallbackInbox<F> {
    handler: F,
}

impl<F> Inbox for CallbackInbox<F>
where
    F: Fn(&BusMessage) + Send + Sync,
{
    fn deliver(&self, message: &BusMessage) {
        (self.handler)(message)
    }
}

/// Registered name plus the bus it lives on; deregisters on drop
struct Registration {
    name: String,
    bus: Bus,
    _inbox: Arc<dyn Inbox>,
}

impl Registration {
    fn new(bus: &Bus, inbox: Arc<dyn Inbox>, privileged: Option<&str>) -> Result<Self> {
        let weak: Weak<dyn Inbox> = Arc::downgrade(&inbox);
        let name = bus.register(weak, AgentKind::InProcess, privileged)?;
        Ok(Self {
            name,
            bus: bus.clone(),
            _inbox: inbox,
        })
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.bus.deregister(&self.name);
    }
}

/// Outbound operations shared by every in-process agent
///
/// Each method acts on the bus with this agent as sender or listener.
pub trait BusAgent {
    /// Bus name of this agent
    fn name(&self) -> &str;

    /// Bus this agent is registered on
    fn bus(&self) -> &Bus;

    /// Broadcast to subscribers; returns how many inboxes were reached
    fn send(&self, data: Value) -> usize {
        self.bus().send(self.name(), data)
    }

    /// Point-to-point send; returns whether it was delivered
    fn send_to(&self, recipient: &str, data: Value) -> bool {
        self.bus().send_to(self.name(), recipient, data)
    }

    fn subscribe(&self) {
        self.bus().subscribe(self.name())
    }

    fn subscribe_to(&self, sender: &str) {
        self.bus().subscribe_to(self.name(), sender)
    }

    fn subscribe_to_exclusively(&self, sender: &str) {
        self.bus().subscribe_to_exclusively(self.name(), sender)
    }

    fn unsubscribe(&self) {
        self.bus().unsubscribe(self.name())
    }

    fn unsubscribe_from(&self, sender: &str) {
        self.bus().unsubscribe_from(self.name(), sender)
    }

    fn unsubscribe_from_all(&self) {
        self.bus().unsubscribe_from_all(self.name())
    }

    /// Current subscriptions of this agent
    fn subscriptions(&self) -> Vec<Source> {
        self.bus().subscriptions_of(self.name())
    }
}

/// In-process agent that queues deliveries in a mailbox
///
/// # Example
///
/// ```
/// use agent_bus::{Bus, BusAgent};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let bus = Bus::new();
///     let viewer = bus.create_mailbox_agent(None)?;
///     let mut listener = bus.create_mailbox_agent(None)?;
///
///     listener.subscribe_to(viewer.name());
///     viewer.send(json!({"event": "page-changed"}));
///
///     let message = listener.recv().await.unwrap();
///     assert_eq!(message.from, viewer.name());
///     Ok(())
/// }
/// ```
pub struct MailboxAgent {
    registration: Registration,
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl MailboxAgent {
    pub(crate) fn new(bus: &Bus, privileged: Option<&str>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let registration = Registration::new(bus, Arc::new(ChannelInbox::new(tx)), privileged)?;
        tracing::debug!("Registered mailbox agent: {}", registration.name);
        Ok(Self { registration, rx })
    }

    /// Wait for the next delivered message
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Take a delivered message if one is queued
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

/// In-process agent that runs a handler for each delivery
///
/// The handler runs on the sender's thread and may itself send on the bus.
pub struct CallbackAgent {
    registration: Registration,
}

impl CallbackAgent {
    pub(crate) fn new<F>(bus: &Bus, privileged: Option<&str>, handler: F) -> Result<Self>
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        let registration = Registration::new(bus, Arc::new(CallbackInbox { handler }), privileged)?;
        tracing::debug!("Registered callback agent: {}", registration.name);
        Ok(Self { registration })
    }
}

impl BusAgent for MailboxAgent {
    fn name(&self) -> &str {
        &self.registration.name
    }

    fn bus(&self) -> &Bus {
        &self.registration.bus
    }
}

impl BusAgent for CallbackAgent {
    fn name(&self) -> &str {
        &self.registration.name
    }

    fn bus(&self) -> &Bus {
        &self.registration.bus
    }
}
