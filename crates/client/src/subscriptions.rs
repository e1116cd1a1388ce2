//! Routing of pushed events to their subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Callback invoked with the `data` of every event pushed for a subscription.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

struct Subscription {
    resource: String,
    channel: String,
    handler: EventHandler,
}

/// Maps remote subscription keys to handlers for one connection epoch.
///
/// The registry only accepts entries for the epoch it was opened with, so a
/// subscribe call that completes after a reconnect can never install a handler
/// against the new connection.
#[derive(Default)]
pub struct SubscriptionRegistry {
    epoch: Option<u64>,
    entries: HashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accepting subscriptions for a new connection epoch.
    pub fn open(&mut self, epoch: u64) {
        self.entries.clear();
        self.epoch = Some(epoch);
    }

    /// Drop every subscription and refuse new ones until the next `open`.
    pub fn clear(&mut self) -> usize {
        self.epoch = None;
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Store a handler under the key the remote assigned.
    /// Returns false if `epoch` is not the open epoch.
    pub fn insert(
        &mut self,
        epoch: u64,
        key: impl Into<String>,
        resource: &str,
        channel: &str,
        handler: EventHandler,
    ) -> bool {
        if self.epoch != Some(epoch) {
            return false;
        }
        let key = key.into();
        let previous = self.entries.insert(
            key.clone(),
            Subscription {
                resource: resource.to_string(),
                channel: channel.to_string(),
                handler,
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(
                %key,
                resource = %previous.resource,
                channel = %previous.channel,
                "replaced existing subscription"
            );
        }
        true
    }

    pub fn handler(&self, key: &str) -> Option<EventHandler> {
        self.entries.get(key).map(|s| Arc::clone(&s.handler))
    }

    /// Keys and the `resource.channel` they were registered for.
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut listed: Vec<_> = self
            .entries
            .iter()
            .map(|(key, s)| (key.clone(), format!("{}.{}", s.resource, s.channel)))
            .collect();
        listed.sort();
        listed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: &Arc<AtomicUsize>) -> EventHandler {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn stores_and_finds_handlers_by_key() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = SubscriptionRegistry::new();
        registry.open(1);
        assert!(registry.insert(
            1,
            "ScenesService.sceneAdded",
            "ScenesService",
            "sceneAdded",
            counting_handler(&hits)
        ));

        let handler = registry.handler("ScenesService.sceneAdded").unwrap();
        handler(json!({"id": "s"}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.handler("ScenesService.sceneRemoved").is_none());
    }

    #[test]
    fn refuses_entries_for_other_epochs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.insert(1, "k", "R", "c", counting_handler(&hits)));

        registry.open(2);
        assert!(!registry.insert(1, "k", "R", "c", counting_handler(&hits)));
        assert!(registry.insert(2, "k", "R", "c", counting_handler(&hits)));

        assert_eq!(registry.clear(), 1);
        assert!(!registry.insert(2, "k", "R", "c", counting_handler(&hits)));
        assert!(registry.is_empty());
    }

    #[test]
    fn reopening_discards_previous_handlers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = SubscriptionRegistry::new();
        registry.open(1);
        registry.insert(1, "k", "R", "c", counting_handler(&hits));
        registry.open(2);
        assert!(registry.handler("k").is_none());
    }

    #[test]
    fn same_key_replaces_handler() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut registry = SubscriptionRegistry::new();
        registry.open(1);
        registry.insert(1, "k", "R", "c", counting_handler(&first));
        registry.insert(1, "k", "R", "c", counting_handler(&second));

        registry.handler("k").unwrap()(Value::Null);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.describe(), vec![("k".to_string(), "R.c".to_string())]);
    }
}
