//! In-process publish/subscribe channel with bounded history.
//!
//! Delivery is synchronous: `publish` invokes every matching handler on the
//! caller's thread before returning. Named handlers run in registration
//! order, then wildcard handlers. A panicking handler is logged and skipped;
//! it never prevents later handlers from running.
//!
//! Handlers are snapshotted under the lock and invoked after it is released,
//! so a handler may publish or subscribe on the same bus.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::metrics::METRICS;

/// Subscribing under this name receives every event.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Oldest records are evicted once this many are held.
    pub max_history_size: usize,
    pub history_enabled: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_history_size: 1000,
            history_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A published event as kept in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_name: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

type PayloadHandler = Arc<dyn Fn(&Value) + Send + Sync>;
type WildcardHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Payload(PayloadHandler),
    Wildcard(WildcardHandler),
}

impl Handler {
    fn call(&self, event_name: &str, payload: &Value) {
        match self {
            Handler::Payload(h) => h(payload),
            Handler::Wildcard(h) => h(event_name, payload),
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    subscriptions: HashMap<String, Vec<Subscription>>,
    history: VecDeque<EventRecord>,
    config: EventBusConfig,
}

pub struct EventBus {
    state: Mutex<BusState>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("EventBus")
            .field("event_names", &state.subscriptions.keys().collect::<Vec<_>>())
            .field("history_len", &state.history.len())
            .field("config", &state.config)
            .finish()
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            state: Mutex::new(BusState {
                config,
                ..BusState::default()
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, event_name: &str, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .subscriptions
            .entry(event_name.to_string())
            .or_default()
            .push(Subscription { id, handler });
        debug!(event_name, subscription = %id, "subscribed");
        id
    }

    /// Registers `handler` for `event_name`. Under [`WILDCARD`] the handler
    /// sees every event's payload.
    pub fn subscribe<F>(&self, event_name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add(event_name, Handler::Payload(Arc::new(handler)))
    }

    /// Registers a wildcard handler that receives `(event_name, payload)`.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.add(WILDCARD, Handler::Wildcard(Arc::new(handler)))
    }

    /// Removes a subscription. Unknown names or ids are a no-op.
    pub fn unsubscribe(&self, event_name: &str, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let Some(subs) = state.subscriptions.get_mut(event_name) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            state.subscriptions.remove(event_name);
        }
        removed
    }

    /// Delivers `payload` to every matching handler and returns how many
    /// handlers were invoked.
    pub fn publish(&self, event_name: &str, payload: Value) -> usize {
        let handlers: Vec<Handler> = {
            let state = self.lock();
            let named = state.subscriptions.get(event_name).into_iter().flatten();
            let wildcard = if event_name == WILDCARD {
                None
            } else {
                state.subscriptions.get(WILDCARD)
            };
            named
                .chain(wildcard.into_iter().flatten())
                .map(|s| s.handler.clone())
                .collect()
        };

        for handler in &handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.call(event_name, &payload)));
            if let Err(panic) = outcome {
                warn!(
                    event_name,
                    panic = %panic_message(panic.as_ref()),
                    "event handler panicked"
                );
            }
        }

        METRICS.inc_events_published();
        debug!(event_name, listeners = handlers.len(), "event published");

        let mut state = self.lock();
        if state.config.history_enabled && state.config.max_history_size > 0 {
            while state.history.len() >= state.config.max_history_size {
                state.history.pop_front();
            }
            state.history.push_back(EventRecord {
                event_name: event_name.to_string(),
                payload,
                timestamp: Utc::now(),
            });
        }

        handlers.len()
    }

    /// Recorded events, oldest first, optionally restricted to one name.
    pub fn history(&self, event_name: Option<&str>) -> Vec<EventRecord> {
        self.lock()
            .history
            .iter()
            .filter(|r| event_name.map_or(true, |n| r.event_name == n))
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.lock().history.clear();
    }

    /// Stops or resumes recording. Existing records are kept.
    pub fn set_history_enabled(&self, enabled: bool) {
        self.lock().config.history_enabled = enabled;
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.lock()
            .subscriptions
            .get(event_name)
            .map_or(0, Vec::len)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publish_counts_named_and_wildcard_listeners() {
        let bus = EventBus::default();
        bus.subscribe("a", |_| {});
        bus.subscribe("a", |_| {});
        bus.subscribe_all(|_, _| {});
        assert_eq!(bus.publish("a", json!({})), 3);
        assert_eq!(bus.publish("b", json!({})), 1);
        assert_eq!(bus.listener_count("a"), 2);
        assert_eq!(bus.listener_count(WILDCARD), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::default();
        let id = bus.subscribe("a", |_| {});
        assert!(bus.unsubscribe("a", id));
        assert!(!bus.unsubscribe("a", id));
        assert!(!bus.unsubscribe("never", id));
        assert_eq!(bus.publish("a", Value::Null), 0);
    }

    #[test]
    fn disabled_history_records_nothing() {
        let bus = EventBus::new(EventBusConfig {
            history_enabled: false,
            ..EventBusConfig::default()
        });
        bus.publish("a", json!(1));
        assert!(bus.history(None).is_empty());
        bus.set_history_enabled(true);
        bus.publish("a", json!(2));
        assert_eq!(bus.history(Some("a")).len(), 1);
    }
}
