//! The bus: agent directory, subscription table and routing

use bus_core::{BusConfig, BusSettings, DirectDelivery, ScriptHostConfig};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Weak};

use crate::agent::{CallbackAgent, Inbox, MailboxAgent};
use crate::registry::{AgentInfo, AgentKind, Directory};
use crate::subscription::{Source, SubscriptionTable};
use crate::transport::Transport;
use crate::{BusError, BusMessage, Result};

#[derive(Default)]
struct BusState {
    directory: Directory,
    subscriptions: SubscriptionTable,
}

pub(crate) struct BusInner {
    state: RwLock<BusState>,
    /// Transport agents created by and owned by the bus
    transports: DashMap<String, Transport>,
    settings: BusSettings,
    script: ScriptHostConfig,
}

/// Process-wide message bus
///
/// Cheap to clone; all clones share one directory and subscription table.
/// Transport agents created through the bus live until their peer goes
/// away, [`Bus::close_agent`] is called, or the last clone is dropped.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

/// Non-owning bus reference held by transport tasks
#[derive(Clone)]
pub struct WeakBus {
    inner: Weak<BusInner>,
}

impl WeakBus {
    pub fn upgrade(&self) -> Option<Bus> {
        self.inner.upgrade().map(|inner| Bus { inner })
    }
}

impl Bus {
    /// Create a bus with default settings
    pub fn new() -> Self {
        Self::with_settings(BusSettings::default(), ScriptHostConfig::default())
    }

    /// Create a bus with explicit routing and script host settings
    pub fn with_settings(settings: BusSettings, script: ScriptHostConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: RwLock::new(BusState::default()),
                transports: DashMap::new(),
                settings,
                script,
            }),
        }
    }

    /// Create a bus from a loaded configuration
    pub fn from_config(config: &BusConfig) -> Self {
        Self::with_settings(config.bus.clone(), config.script.clone())
    }

    /// Load a configuration file and create a bus from it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = bus_core::load_config(path)?;
        Ok(Self::from_config(&config))
    }

    pub fn downgrade(&self) -> WeakBus {
        WeakBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn settings(&self) -> &BusSettings {
        &self.inner.settings
    }

    pub fn script_host(&self) -> &ScriptHostConfig {
        &self.inner.script
    }

    // ---- directory ----

    /// Register an inbox under a generated name, or under `privileged` if given
    pub fn register(
        &self,
        inbox: Weak<dyn Inbox>,
        kind: AgentKind,
        privileged: Option<&str>,
    ) -> Result<String> {
        match privileged {
            Some(name) => {
                if name.trim().is_empty() || name.trim() != name {
                    return Err(BusError::InvalidName(name.to_string()));
                }
                self.register_named(inbox, kind, name.to_string(), true)
            }
            None => loop {
                let name = uuid::Uuid::new_v4().to_string();
                match self.register_named(Weak::clone(&inbox), kind.clone(), name, false) {
                    Err(BusError::NameTaken(_)) => continue,
                    result => break result,
                }
            },
        }
    }

    pub(crate) fn register_named(
        &self,
        inbox: Weak<dyn Inbox>,
        kind: AgentKind,
        name: String,
        privileged: bool,
    ) -> Result<String> {
        let mut state = self.inner.state.write();
        if !state
            .directory
            .insert(name.clone(), kind.clone(), privileged, inbox)
        {
            return Err(BusError::NameTaken(name));
        }
        drop(state);

        tracing::info!(agent = %name, ?kind, privileged, "Agent registered");
        Ok(name)
    }

    /// Remove an agent and every subscription naming it
    ///
    /// A bus-owned transport agent under this name is closed as well.
    /// Returns false if the name was not registered.
    pub fn deregister(&self, name: &str) -> bool {
        self.remove_agent(name, None)
    }

    /// Deregister `name` only if it is still backed by `inbox`
    pub(crate) fn deregister_owned(&self, name: &str, inbox: &Weak<dyn Inbox>) -> bool {
        self.remove_agent(name, Some(inbox))
    }

    fn remove_agent(&self, name: &str, expected: Option<&Weak<dyn Inbox>>) -> bool {
        let removed = {
            let mut state = self.inner.state.write();
            if let Some(expected) = expected {
                if !state.directory.holds(name, expected) {
                    return false;
                }
            }
            let removed = state.directory.remove(name);
            if removed.is_some() {
                state.subscriptions.remove_agent(name);
            }
            removed
        };

        let Some(inbox) = removed else {
            return false;
        };

        // Dropped outside every lock; its Drop may call back into the bus.
        let transport = self
            .inner
            .transports
            .remove_if(name, |_, transport| transport.owns(&inbox));
        drop(transport);

        tracing::info!(agent = %name, "Agent deregistered");
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.state.read().directory.contains(name)
    }

    pub fn is_privileged(&self, name: &str) -> bool {
        self.agent_info(name)
            .map(|info| info.privileged)
            .unwrap_or(false)
    }

    pub fn agent_info(&self, name: &str) -> Option<AgentInfo> {
        self.inner.state.read().directory.info(name)
    }

    /// Registered agents in registration order
    pub fn agents(&self) -> Vec<AgentInfo> {
        self.inner.state.read().directory.list()
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents().into_iter().map(|info| info.name).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().directory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---- in-process agents ----

    /// Create an in-process agent that queues deliveries
    pub fn create_mailbox_agent(&self, privileged: Option<&str>) -> Result<MailboxAgent> {
        MailboxAgent::new(self, privileged)
    }

    /// Create an in-process agent that runs `handler` on each delivery
    pub fn create_callback_agent<F>(
        &self,
        privileged: Option<&str>,
        handler: F,
    ) -> Result<CallbackAgent>
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        CallbackAgent::new(self, privileged, handler)
    }

    // ---- transport agents ----

    pub(crate) fn adopt_transport(&self, transport: Transport) {
        let name = transport.name().to_string();
        let inbox = transport.inbox();
        tracing::debug!(agent = %name, "Bus took ownership of transport");
        self.inner.transports.insert(name.clone(), transport);

        // The peer may have gone away before ownership was recorded.
        let still_registered = self.inner.state.read().directory.holds(&name, &inbox);
        if !still_registered {
            let stale = self
                .inner
                .transports
                .remove_if(&name, |_, transport| transport.owns(&inbox));
            drop(stale);
        }
    }

    /// Close a transport agent created by this bus (or deregister any other agent)
    pub fn close_agent(&self, name: &str) -> bool {
        self.deregister(name)
    }

    /// Close every transport agent owned by the bus
    pub fn shutdown(&self) {
        let names: Vec<String> = self
            .inner
            .transports
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for name in names {
            self.deregister(&name);
        }
        tracing::info!("Bus shut down");
    }

    /// Names of transport agents currently owned by the bus
    pub fn transport_names(&self) -> Vec<String> {
        self.inner
            .transports
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    // ---- routing ----

    /// Point-to-point delivery
    ///
    /// Dropped silently when the sender or recipient is not registered, or
    /// when [`DirectDelivery::RequireSubscription`] is set and the recipient
    /// does not listen to the sender. Returns whether the message was delivered.
    pub fn send_to(&self, sender: &str, recipient: &str, data: Value) -> bool {
        let target = {
            let state = self.inner.state.read();
            if !state.directory.contains(sender) {
                None
            } else {
                let permitted = match self.inner.settings.direct_delivery {
                    DirectDelivery::Bypass => true,
                    DirectDelivery::RequireSubscription => {
                        state.subscriptions.permits(recipient, sender)
                    }
                };
                if permitted {
                    state.directory.inbox(recipient)
                } else {
                    None
                }
            }
        };

        match target {
            Some(inbox) => {
                let message = BusMessage::direct(sender, recipient, data);
                tracing::debug!(from = %sender, to = %recipient, id = %message.id, "Delivering");
                inbox.deliver(&message);
                true
            }
            None => {
                tracing::debug!(from = %sender, to = %recipient, "Undeliverable message dropped");
                false
            }
        }
    }

    /// Broadcast to every subscriber of `sender`, in subscription order
    ///
    /// Returns how many inboxes were reached.
    pub fn send(&self, sender: &str, data: Value) -> usize {
        let targets: Vec<Arc<dyn Inbox>> = {
            let state = self.inner.state.read();
            if !state.directory.contains(sender) {
                tracing::debug!(from = %sender, "Broadcast from unregistered sender dropped");
                return 0;
            }
            state
                .subscriptions
                .listeners_for(sender)
                .iter()
                .filter_map(|listener| state.directory.inbox(listener))
                .collect()
        };

        if targets.is_empty() {
            tracing::trace!(from = %sender, "Broadcast has no listeners");
            return 0;
        }

        let message = BusMessage::broadcast(sender, data);
        tracing::debug!(from = %sender, id = %message.id, listeners = targets.len(), "Broadcasting");
        for inbox in &targets {
            inbox.deliver(&message);
        }
        targets.len()
    }

    // ---- subscriptions ----

    fn update_subscriptions<F>(&self, listener: &str, operation: &str, update: F)
    where
        F: FnOnce(&mut SubscriptionTable),
    {
        let mut state = self.inner.state.write();
        if !state.directory.contains(listener) {
            tracing::debug!(agent = %listener, operation, "Ignoring subscription change for unregistered agent");
            return;
        }
        update(&mut state.subscriptions);
        tracing::debug!(agent = %listener, operation, "Subscriptions updated");
    }

    /// Hear every broadcast on the bus
    pub fn subscribe(&self, listener: &str) {
        self.update_subscriptions(listener, "subscribe", |table| {
            table.subscribe(listener);
        });
    }

    /// Also hear broadcasts from `sender`
    pub fn subscribe_to(&self, listener: &str, sender: &str) {
        self.update_subscriptions(listener, "subscribe_to", |table| {
            table.subscribe_to(listener, sender);
        });
    }

    /// Hear broadcasts from `sender` only
    pub fn subscribe_to_exclusively(&self, listener: &str, sender: &str) {
        self.update_subscriptions(listener, "subscribe_to_exclusively", |table| {
            table.subscribe_to_exclusively(listener, sender);
        });
    }

    /// Stop hearing every broadcast (named-sender subscriptions remain)
    pub fn unsubscribe(&self, listener: &str) {
        self.inner.state.write().subscriptions.unsubscribe(listener);
    }

    /// Stop hearing `sender`
    pub fn unsubscribe_from(&self, listener: &str, sender: &str) {
        self.inner
            .state
            .write()
            .subscriptions
            .unsubscribe_from(listener, sender);
    }

    /// Drop every subscription of `listener`
    pub fn unsubscribe_from_all(&self, listener: &str) {
        self.inner
            .state
            .write()
            .subscriptions
            .unsubscribe_from_all(listener);
    }

    /// Subscriptions held by `listener`, in registration order
    pub fn subscriptions_of(&self, listener: &str) -> Vec<Source> {
        self.inner.state.read().subscriptions.sources_of(listener)
    }

    /// Snapshot of the whole subscription table
    pub fn subscriptions(&self) -> SubscriptionTable {
        self.inner.state.read().subscriptions.clone()
    }
}

#[cfg(not(unix))]
impl Bus {
    /// Local server agents need Unix domain sockets
    pub async fn create_local_server_agent(
        &self,
        _server_name: &str,
        _privileged_uuid: Option<&str>,
    ) -> Result<String> {
        Err(BusError::Unsupported("local server agents"))
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
