//! Subscription registry: which client hears about which path
//!
//! Subscriptions are created implicitly by directory fetches and explicitly
//! by Subscribe commands. Dead clients are pruned lazily: on disconnect, and
//! whenever a fan-out send fails.

use std::collections::HashSet;

use dashmap::DashMap;
use emberplus_network::ClientId;
use emberplus_types::EmberPath;
use tracing::debug;

/// Path -> set of subscribed clients
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: DashMap<EmberPath, HashSet<ClientId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` for updates under `path`; idempotent
    pub fn subscribe(&self, path: &EmberPath, client: ClientId) {
        let inserted = self.topics.entry(path.clone()).or_default().insert(client);
        if inserted {
            debug!(%client, path = %path, "subscribed");
        }
    }

    pub fn unsubscribe(&self, path: &EmberPath, client: ClientId) {
        if let Some(mut entry) = self.topics.get_mut(path) {
            if entry.remove(&client) {
                debug!(%client, path = %path, "unsubscribed");
            }
        }
        self.topics.retain(|_, clients| !clients.is_empty());
    }

    /// Drop every subscription held by `client`
    pub fn unsubscribe_all(&self, client: ClientId) {
        for mut entry in self.topics.iter_mut() {
            entry.value_mut().remove(&client);
        }
        self.topics.retain(|_, clients| !clients.is_empty());
    }

    /// Clients subscribed to exactly `path`
    pub fn subscribers_of(&self, path: &EmberPath) -> Vec<ClientId> {
        self.topics
            .get(path)
            .map(|clients| clients.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, path: &EmberPath, client: ClientId) -> bool {
        self.topics
            .get(path)
            .is_some_and(|clients| clients.contains(&client))
    }

    /// Number of paths with at least one subscriber
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> EmberPath {
        s.parse().unwrap()
    }

    #[test]
    fn test_subscribe_and_fan_out_set() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(&path("0.1"), 1);
        registry.subscribe(&path("0.1"), 2);
        registry.subscribe(&path("0.1"), 2);
        registry.subscribe(&path("0.2"), 3);

        let mut subscribers = registry.subscribers_of(&path("0.1"));
        subscribers.sort_unstable();
        assert_eq!(subscribers, vec![1, 2]);
        assert_eq!(registry.topic_count(), 2);
    }

    #[test]
    fn test_unsubscribe_all_prunes_empty_topics() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(&path("0.1"), 1);
        registry.subscribe(&path("0.2"), 1);
        registry.subscribe(&path("0.2"), 2);

        registry.unsubscribe_all(1);
        assert!(registry.subscribers_of(&path("0.1")).is_empty());
        assert_eq!(registry.subscribers_of(&path("0.2")), vec![2]);
        assert_eq!(registry.topic_count(), 1);
    }

    #[test]
    fn test_unsubscribe_single_path() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(&path("3"), 7);
        assert!(registry.is_subscribed(&path("3"), 7));
        registry.unsubscribe(&path("3"), 7);
        assert!(!registry.is_subscribed(&path("3"), 7));
        assert_eq!(registry.topic_count(), 0);
    }
}
