//! Transport-backed agents owned by the bus

use std::sync::{Arc, Weak};

use crate::agent::Inbox;
use crate::process::ChildProcessAgent;

#[cfg(unix)]
use crate::local_server::LocalServerAgent;

/// A transport agent kept alive by the bus
///
/// Dropping a transport closes it: child processes are killed and local
/// servers stop listening.
pub(crate) enum Transport {
    Process(ChildProcessAgent),
    #[cfg(unix)]
    LocalServer(LocalServerAgent),
}

impl Transport {
    pub fn name(&self) -> &str {
        match self {
            Transport::Process(agent) => agent.name(),
            #[cfg(unix)]
            Transport::LocalServer(agent) => agent.name(),
        }
    }

    fn inbox_arc(&self) -> &Arc<dyn Inbox> {
        match self {
            Transport::Process(agent) => agent.inbox(),
            #[cfg(unix)]
            Transport::LocalServer(agent) => agent.inbox(),
        }
    }

    /// Weak reference to the inbox registered for this transport
    pub fn inbox(&self) -> Weak<dyn Inbox> {
        Arc::downgrade(self.inbox_arc())
    }

    /// Whether this transport is the one registered with `inbox`
    pub fn owns(&self, inbox: &Weak<dyn Inbox>) -> bool {
        Weak::ptr_eq(&self.inbox(), inbox)
    }
}
