//! Per-event subscriber lists with a retained payload slot
//!
//! Payloads emitted while an event has no subscribers can be retained (last
//! write wins) and are handed to the first subscriber that shows up.

use crate::call::CallResponder;
use callbridge_api::CallId;
use serde_json::Value;
use std::collections::HashMap;

/// What happened to a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Fanned out to the current subscribers
    Delivered { delivered: usize, failed: usize },
    /// No subscribers; kept for the first one
    Retained,
    /// No subscribers and no retention requested
    Dropped,
}

/// Event subscriptions for one plugin instance
#[derive(Debug, Default)]
pub struct EventHub {
    listeners: HashMap<String, Vec<CallResponder>>,
    retained: HashMap<String, Value>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber
    ///
    /// The first subscriber of an event receives the retained payload, if
    /// any, before this returns. Returns whether a retained payload was
    /// delivered.
    pub fn subscribe(&mut self, event: &str, subscriber: CallResponder) -> bool {
        let listeners = self.listeners.entry(event.to_string()).or_default();
        let first = listeners.is_empty();
        listeners.push(subscriber.clone());

        if !first {
            return false;
        }
        match self.retained.remove(event) {
            Some(payload) => {
                tracing::debug!(event = %event, call = %subscriber.call_id(), "Delivering retained payload");
                if let Err(e) = subscriber.resolve(Some(payload)) {
                    tracing::warn!(event = %event, error = %e, "Retained payload delivery failed");
                }
                true
            }
            None => false,
        }
    }

    /// Remove a subscriber; no-op if absent
    pub fn unsubscribe(&mut self, event: &str, call: &CallId) -> bool {
        let Some(listeners) = self.listeners.get_mut(event) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|listener| listener.call_id() != call);
        before != listeners.len()
    }

    /// Deliver a payload to every subscriber in subscription order
    ///
    /// A failing subscriber does not stop delivery to the rest.
    pub fn notify(&mut self, event: &str, payload: Value, retain: bool) -> NotifyOutcome {
        let listeners = match self.listeners.get(event) {
            Some(listeners) if !listeners.is_empty() => listeners,
            _ => {
                tracing::debug!(event = %event, "No listeners found for event");
                if retain {
                    self.retained.insert(event.to_string(), payload);
                    return NotifyOutcome::Retained;
                }
                return NotifyOutcome::Dropped;
            }
        };

        let mut delivered = 0;
        let mut failed = 0;
        for listener in listeners {
            tracing::trace!(event = %event, call = %listener.call_id(), "Notifying listener");
            match listener.resolve(Some(payload.clone())) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(event = %event, call = %listener.call_id(), error = %e, "Listener delivery failed");
                }
            }
        }
        NotifyOutcome::Delivered { delivered, failed }
    }

    pub fn has_subscribers(&self, event: &str) -> bool {
        self.listeners
            .get(event)
            .is_some_and(|listeners| !listeners.is_empty())
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, Vec::len)
    }

    /// Retained payload waiting for a first subscriber
    pub fn retained(&self, event: &str) -> Option<&Value> {
        self.retained.get(event)
    }

    /// Drop every subscription; retained payloads stay
    pub fn clear_all(&mut self) -> Vec<CallId> {
        self.listeners
            .drain()
            .flat_map(|(_, listeners)| listeners)
            .map(|listener| listener.call_id().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CollectingSink;
    use serde_json::json;
    use std::sync::Arc;

    fn responder(id: &str, sink: &Arc<CollectingSink>) -> CallResponder {
        CallResponder::new(CallId::new(id), sink.clone())
    }

    #[test]
    fn test_retained_payload_goes_to_first_subscriber_once() {
        let sink = Arc::new(CollectingSink::new());
        let mut hub = EventHub::new();

        assert_eq!(
            hub.notify("x", json!({"p": 1}), true),
            NotifyOutcome::Retained
        );
        assert!(hub.subscribe("x", responder("a", &sink)));
        assert!(!hub.subscribe("x", responder("b", &sink)));

        assert_eq!(sink.responses_for("a").len(), 1);
        assert_eq!(sink.responses_for("a")[0].payload(), Some(&json!({"p": 1})));
        assert!(sink.responses_for("b").is_empty());
        assert!(hub.retained("x").is_none());
    }

    #[test]
    fn test_retained_slot_is_last_write_wins() {
        let sink = Arc::new(CollectingSink::new());
        let mut hub = EventHub::new();

        hub.notify("x", json!(1), true);
        hub.notify("x", json!(2), true);
        assert_eq!(hub.retained("x"), Some(&json!(2)));

        hub.subscribe("x", responder("a", &sink));
        assert_eq!(sink.responses_for("a")[0].payload(), Some(&json!(2)));
    }

    #[test]
    fn test_unretained_notify_is_dropped() {
        let mut hub = EventHub::new();
        assert_eq!(hub.notify("x", json!(1), false), NotifyOutcome::Dropped);
        assert!(hub.retained("x").is_none());
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let sink = Arc::new(CollectingSink::new());
        let mut hub = EventHub::new();
        hub.subscribe("x", responder("a", &sink));
        hub.subscribe("x", responder("b", &sink));

        let outcome = hub.notify("x", json!("hello"), false);

        assert_eq!(
            outcome,
            NotifyOutcome::Delivered {
                delivered: 2,
                failed: 0
            }
        );
        let order: Vec<String> = sink
            .responses()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let sink = Arc::new(CollectingSink::new());
        sink.fail_for("a");
        let mut hub = EventHub::new();
        hub.subscribe("x", responder("a", &sink));
        hub.subscribe("x", responder("b", &sink));

        let outcome = hub.notify("x", json!(1), false);

        assert_eq!(
            outcome,
            NotifyOutcome::Delivered {
                delivered: 1,
                failed: 1
            }
        );
        assert_eq!(sink.responses_for("b").len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let sink = Arc::new(CollectingSink::new());
        let mut hub = EventHub::new();
        hub.subscribe("x", responder("a", &sink));

        assert!(hub.unsubscribe("x", &CallId::new("a")));
        assert!(!hub.unsubscribe("x", &CallId::new("a")));
        assert!(!hub.unsubscribe("y", &CallId::new("a")));
        assert!(!hub.has_subscribers("x"));

        // With the list empty again, notifications can be retained
        assert_eq!(hub.notify("x", json!(1), true), NotifyOutcome::Retained);
    }

    #[test]
    fn test_clear_all_keeps_retained() {
        let sink = Arc::new(CollectingSink::new());
        let mut hub = EventHub::new();
        hub.notify("y", json!("kept"), true);
        hub.subscribe("x", responder("a", &sink));

        let removed = hub.clear_all();

        assert_eq!(removed, vec![CallId::new("a")]);
        assert!(!hub.has_subscribers("x"));
        assert_eq!(hub.retained("y"), Some(&json!("kept")));
    }
}
