//! Agent directory

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use crate::agent::Inbox;

/// What kind of endpoint backs an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentKind {
    /// Same process (mailbox or callback)
    InProcess,

    /// Spawned child process
    ChildProcess { pid: Option<u32> },

    /// Child process hosted by the script interpreter
    ScriptProcess { pid: Option<u32> },

    /// Listening local socket
    LocalServer { path: PathBuf },

    /// Connection accepted by a local server
    LocalConnection { server: String },
}

/// Public view of a registered agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub kind: AgentKind,
    /// Name was chosen by the caller instead of generated
    pub privileged: bool,
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

struct Entry {
    info: AgentInfo,
    seq: u64,
    inbox: Weak<dyn Inbox>,
}

/// Name -> agent mapping, holding only weak references to inboxes
#[derive(Default)]
pub(crate) struct Directory {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

impl Directory {
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Insert a new agent. Returns false if the name is taken.
    pub fn insert(
        &mut self,
        name: String,
        kind: AgentKind,
        privileged: bool,
        inbox: Weak<dyn Inbox>,
    ) -> bool {
        if self.entries.contains_key(&name) {
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let info = AgentInfo {
            name: name.clone(),
            kind,
            privileged,
            registered_at: chrono::Utc::now(),
        };
        self.entries.insert(name, Entry { info, seq, inbox });
        true
    }

    /// Remove an agent, returning its inbox reference
    pub fn remove(&mut self, name: &str) -> Option<Weak<dyn Inbox>> {
        self.entries.remove(name).map(|entry| entry.inbox)
    }

    /// Whether `name` is currently registered with exactly this inbox
    pub fn holds(&self, name: &str, inbox: &Weak<dyn Inbox>) -> bool {
        self.entries
            .get(name)
            .map(|entry| Weak::ptr_eq(&entry.inbox, inbox))
            .unwrap_or(false)
    }

    /// Live inbox for `name`; None if unknown or already dropped
    pub fn inbox(&self, name: &str) -> Option<Arc<dyn Inbox>> {
        self.entries.get(name).and_then(|entry| entry.inbox.upgrade())
    }

    pub fn info(&self, name: &str) -> Option<AgentInfo> {
        self.entries.get(name).map(|entry| entry.info.clone())
    }

    /// All agents in registration order
    pub fn list(&self) -> Vec<AgentInfo> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.info.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
