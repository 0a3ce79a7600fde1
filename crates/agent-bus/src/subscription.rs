//! Subscription table
//!
//! Edges are kept in insertion order; broadcast delivery follows that order.

use serde::{Deserialize, Serialize};

/// Whose broadcasts a listener hears
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum Source {
    /// Every sender on the bus
    All,

    /// One named sender
    Sender(String),
}

impl Source {
    fn matches(&self, sender: &str) -> bool {
        match self {
            Source::All => true,
            Source::Sender(name) => name == sender,
        }
    }
}

/// A directed `listener <- source` edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub listener: String,
    pub source: Source,
}

/// Ordered set of subscription edges
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTable {
    edges: Vec<Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge; existing edges keep their position
    fn add(&mut self, listener: &str, source: Source) -> bool {
        let exists = self
            .edges
            .iter()
            .any(|edge| edge.listener == listener && edge.source == source);
        if exists {
            return false;
        }
        self.edges.push(Subscription {
            listener: listener.to_string(),
            source,
        });
        true
    }

    fn remove(&mut self, listener: &str, source: &Source) -> bool {
        let before = self.edges.len();
        self.edges
            .retain(|edge| !(edge.listener == listener && &edge.source == source));
        self.edges.len() != before
    }

    /// Hear every sender
    pub fn subscribe(&mut self, listener: &str) -> bool {
        self.add(listener, Source::All)
    }

    /// Hear `sender`, in addition to existing subscriptions
    pub fn subscribe_to(&mut self, listener: &str, sender: &str) -> bool {
        self.add(listener, Source::Sender(sender.to_string()))
    }

    /// Hear only `sender`
    pub fn subscribe_to_exclusively(&mut self, listener: &str, sender: &str) {
        self.unsubscribe_from_all(listener);
        self.add(listener, Source::Sender(sender.to_string()));
    }

    /// Drop the hear-everything edge
    pub fn unsubscribe(&mut self, listener: &str) -> bool {
        self.remove(listener, &Source::All)
    }

    /// Drop the edge to `sender`
    pub fn unsubscribe_from(&mut self, listener: &str, sender: &str) -> bool {
        self.remove(listener, &Source::Sender(sender.to_string()))
    }

    /// Drop every edge of `listener`; returns how many were removed
    pub fn unsubscribe_from_all(&mut self, listener: &str) -> usize {
        let before = self.edges.len();
        self.edges.retain(|edge| edge.listener != listener);
        before - self.edges.len()
    }

    /// Forget an agent entirely, as listener and as named sender
    pub fn remove_agent(&mut self, name: &str) {
        self.edges.retain(|edge| {
            edge.listener != name && edge.source != Source::Sender(name.to_string())
        });
    }

    /// Listeners that should hear a broadcast from `sender`, in edge order,
    /// without duplicates and never including `sender` itself
    pub fn listeners_for(&self, sender: &str) -> Vec<String> {
        let mut listeners: Vec<String> = Vec::new();
        for edge in &self.edges {
            if edge.listener == sender || !edge.source.matches(sender) {
                continue;
            }
            if !listeners.contains(&edge.listener) {
                listeners.push(edge.listener.clone());
            }
        }
        listeners
    }

    /// Whether `listener` holds an edge that lets it hear `sender`
    pub fn permits(&self, listener: &str, sender: &str) -> bool {
        self.edges
            .iter()
            .any(|edge| edge.listener == listener && edge.source.matches(sender))
    }

    /// Sources `listener` is subscribed to, in edge order
    pub fn sources_of(&self, listener: &str) -> Vec<Source> {
        self.edges
            .iter()
            .filter(|edge| edge.listener == listener)
            .map(|edge| edge.source.clone())
            .collect()
    }

    pub fn edges(&self) -> &[Subscription] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut table = SubscriptionTable::new();
        assert!(table.subscribe("l"));
        assert!(!table.subscribe("l"));
        assert!(table.subscribe_to("l", "s"));
        assert!(!table.subscribe_to("l", "s"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_exclusive_clears_other_edges() {
        let mut table = SubscriptionTable::new();
        table.subscribe("l");
        table.subscribe_to("l", "a");
        table.subscribe_to("other", "a");

        table.subscribe_to_exclusively("l", "b");

        assert_eq!(table.sources_of("l"), vec![Source::Sender("b".into())]);
        assert_eq!(table.sources_of("other"), vec![Source::Sender("a".into())]);
        assert!(table.listeners_for("a").iter().all(|l| l != "l"));
    }

    #[test]
    fn test_unsubscribe_variants() {
        let mut table = SubscriptionTable::new();
        table.subscribe("l");
        table.subscribe_to("l", "a");
        table.subscribe_to("l", "b");

        assert!(table.unsubscribe("l"));
        assert!(!table.unsubscribe("l"));
        assert!(table.unsubscribe_from("l", "a"));
        assert!(!table.unsubscribe_from("l", "a"));
        assert_eq!(table.unsubscribe_from_all("l"), 1);
        assert_eq!(table.unsubscribe_from_all("l"), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_listeners_in_order_without_duplicates() {
        let mut table = SubscriptionTable::new();
        table.subscribe_to("second", "s");
        table.subscribe("first-all");
        table.subscribe_to("first-all", "s");
        table.subscribe_to("third", "s");
        table.subscribe_to("unrelated", "x");

        assert_eq!(
            table.listeners_for("s"),
            vec!["second", "first-all", "third"]
        );
    }

    #[test]
    fn test_sender_never_hears_itself() {
        let mut table = SubscriptionTable::new();
        table.subscribe("s");
        table.subscribe_to("s", "s");
        assert!(table.listeners_for("s").is_empty());
    }

    #[test]
    fn test_remove_agent_both_directions() {
        let mut table = SubscriptionTable::new();
        table.subscribe("gone");
        table.subscribe_to("stay", "gone");
        table.subscribe_to("stay", "other");
        table.subscribe("stay");

        table.remove_agent("gone");

        assert_eq!(
            table.sources_of("stay"),
            vec![Source::Sender("other".into()), Source::All]
        );
        assert!(table.sources_of("gone").is_empty());
    }

    #[test]
    fn test_permits() {
        let mut table = SubscriptionTable::new();
        table.subscribe_to("l", "a");
        assert!(table.permits("l", "a"));
        assert!(!table.permits("l", "b"));

        table.subscribe("l");
        assert!(table.permits("l", "b"));
    }
}
