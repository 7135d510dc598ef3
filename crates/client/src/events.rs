//! Listener registry for live-update events.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use bazaar_shared::LiveEvent;
use serde_json::Value;

use crate::lock;

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Returned by [`EventBus::on`]; pass it to [`EventBus::off`] to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<LiveEvent, Vec<(ListenerId, Handler)>>,
}

/// Map from event name to handlers.
///
/// Handlers run on the emitting task, outside the registry lock, so a handler
/// may subscribe or unsubscribe. A panicking handler is logged and does not
/// stop delivery to the others.
#[derive(Default)]
pub struct EventBus {
    registry: Mutex<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &self,
        event: impl Into<LiveEvent>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry
            .handlers
            .entry(event.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns `false` if `id` was not registered for `event`.
    pub fn off(&self, event: impl Into<LiveEvent>, id: ListenerId) -> bool {
        let event = event.into();
        let mut registry = lock(&self.registry);
        let Some(handlers) = registry.handlers.get_mut(&event) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            registry.handlers.remove(&event);
        }
        removed
    }

    pub fn has_listeners(&self, event: &LiveEvent) -> bool {
        lock(&self.registry)
            .handlers
            .get(event)
            .is_some_and(|handlers| !handlers.is_empty())
    }

    /// Deliver `data` to every handler of `event`. Returns how many handlers
    /// completed without panicking.
    pub fn emit(&self, event: &LiveEvent, data: &Value) -> usize {
        let handlers: Vec<Handler> = match lock(&self.registry).handlers.get(event) {
            Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(data))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::warn!(%event, "event handler panicked"),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_to_each_handler_of_the_event() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let hits = hits.clone();
            bus.on(LiveEvent::FeedUpdate, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.on(LiveEvent::Notification, |_| panic!("wrong event"));

        assert_eq!(bus.emit(&LiveEvent::FeedUpdate, &json!({"id": 1})), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.on("notification", |_| panic!("handler bug"));
        let counter = hits.clone();
        bus.on("notification", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.emit(&LiveEvent::Notification, &Value::Null), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_removes_only_that_listener() {
        let bus = EventBus::new();
        let first = bus.on(LiveEvent::FeedUpdate, |_| {});
        let second = bus.on(LiveEvent::FeedUpdate, |_| {});

        assert!(bus.off(LiveEvent::FeedUpdate, first));
        assert!(!bus.off(LiveEvent::FeedUpdate, first));
        assert!(bus.has_listeners(&LiveEvent::FeedUpdate));

        assert!(bus.off(LiveEvent::FeedUpdate, second));
        assert!(!bus.has_listeners(&LiveEvent::FeedUpdate));
        assert_eq!(bus.emit(&LiveEvent::FeedUpdate, &Value::Null), 0);
    }
}
