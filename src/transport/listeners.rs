//! Listener registry shared by all transports
//!
//! Handlers are cloned out of the map before they are invoked, so a handler
//! may deregister itself (or its sibling) while being dispatched.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{EventHandler, Lifecycle, LifecycleHandler, ListenerId};

/// Event and lifecycle subscriptions for one socket
pub struct Listeners {
    next_id: AtomicU64,
    events: DashMap<ListenerId, (String, EventHandler)>,
    lifecycle: DashMap<ListenerId, LifecycleHandler>,
}

impl Default for Listeners {
    fn default() -> Self {
        Self::new()
    }
}

impl Listeners {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            events: DashMap::new(),
            lifecycle: DashMap::new(),
        }
    }

    fn allocate(&self) -> ListenerId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Subscribe to a named event
    pub fn on(&self, event: &str, handler: EventHandler) -> ListenerId {
        let id = self.allocate();
        self.events.insert(id, (event.to_string(), handler));
        id
    }

    /// Subscribe to lifecycle signals
    pub fn on_lifecycle(&self, handler: LifecycleHandler) -> ListenerId {
        let id = self.allocate();
        self.lifecycle.insert(id, handler);
        id
    }

    /// Remove a subscription of either kind
    pub fn off(&self, id: ListenerId) {
        self.events.remove(&id);
        self.lifecycle.remove(&id);
    }

    /// Remove every subscription
    pub fn clear(&self) {
        self.events.clear();
        self.lifecycle.clear();
    }

    /// Number of live subscriptions (both kinds)
    pub fn len(&self) -> usize {
        self.events.len() + self.lifecycle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of handlers subscribed to `event`
    pub fn count_for(&self, event: &str) -> usize {
        self.events
            .iter()
            .filter(|entry| entry.value().0 == event)
            .count()
    }

    /// Invoke every handler for `event` in registration order
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let mut handlers: Vec<(ListenerId, EventHandler)> = self
            .events
            .iter()
            .filter(|entry| entry.value().0 == event)
            .map(|entry| (*entry.key(), entry.value().1.clone()))
            .collect();
        handlers.sort_by_key(|(id, _)| *id);

        if handlers.is_empty() {
            tracing::trace!("No listener for event {}", event);
        }

        for (_, handler) in &handlers {
            handler(payload.clone());
        }
        handlers.len()
    }

    /// Invoke every lifecycle handler in registration order
    pub fn dispatch_lifecycle(&self, signal: &Lifecycle) {
        let mut handlers: Vec<(ListenerId, LifecycleHandler)> = self
            .lifecycle
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        handlers.sort_by_key(|(id, _)| *id);

        for (_, handler) in &handlers {
            handler(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_dispatch_in_registration_order() {
        let listeners = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            listeners.on(
                "agent:progress",
                Arc::new(move |_: Value| seen.lock().unwrap().push(tag)),
            );
        }

        assert_eq!(listeners.dispatch("agent:progress", &json!({})), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_dispatch_ignores_other_events() {
        let listeners = Listeners::new();
        listeners.on("agent:result", Arc::new(|_: Value| panic!("wrong event")));
        assert_eq!(listeners.dispatch("agent:error", &json!({})), 0);
    }

    #[test]
    fn test_handler_can_remove_itself_during_dispatch() {
        let listeners = Arc::new(Listeners::new());
        let id_slot = Arc::new(Mutex::new(None::<ListenerId>));
        let calls = Arc::new(Mutex::new(0));

        let handler: EventHandler = {
            let listeners = listeners.clone();
            let id_slot = id_slot.clone();
            let calls = calls.clone();
            Arc::new(move |_: Value| {
                *calls.lock().unwrap() += 1;
                if let Some(id) = *id_slot.lock().unwrap() {
                    listeners.off(id);
                }
            })
        };
        let id = listeners.on("agent:result", handler);
        *id_slot.lock().unwrap() = Some(id);

        listeners.dispatch("agent:result", &json!({}));
        listeners.dispatch("agent:result", &json!({}));
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(listeners.count_for("agent:result"), 0);
    }

    #[test]
    fn test_clear_removes_everything() {
        let listeners = Listeners::new();
        listeners.on("a", Arc::new(|_: Value| {}));
        listeners.on_lifecycle(Arc::new(|_: &Lifecycle| {}));
        assert_eq!(listeners.len(), 2);
        listeners.clear();
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_lifecycle_dispatch() {
        let listeners = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        listeners.on_lifecycle(Arc::new(move |signal: &Lifecycle| {
            sink.lock().unwrap().push(signal.clone());
        }));

        listeners.dispatch_lifecycle(&Lifecycle::Opened);
        listeners.dispatch_lifecycle(&Lifecycle::Closed("server shutdown".to_string()));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Lifecycle::Opened,
                Lifecycle::Closed("server shutdown".to_string())
            ]
        );
    }
}
