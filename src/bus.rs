//! Subscriber registry for input notifications.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::event::InputEvent;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&InputEvent) + Send + Sync>;

/// Fan-out point for every decoded or synthesized input event.
///
/// Handlers run on the dispatch thread in subscription order. A panicking
/// handler is logged and skipped; the remaining handlers still run.
#[derive(Default)]
pub struct EventBus {
    handlers: scc::HashMap<u64, Handler>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: impl Fn(&InputEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.handlers.insert_sync(id, Arc::new(handler));
        SubscriptionId(id)
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.handlers.remove_sync(&id.0).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }

    /// Delivers `event` to every current subscriber. Returns how many
    /// handlers completed without panicking.
    pub fn publish(&self, event: &InputEvent) -> usize {
        let mut snapshot: SmallVec<[(u64, Handler); 8]> = SmallVec::new();
        self.handlers.iter_sync(|id, handler| {
            snapshot.push((*id, Arc::clone(handler)));
            true
        });
        snapshot.sort_unstable_by_key(|(id, _)| *id);

        let mut delivered = 0;
        for (id, handler) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(_) => log::error!("bus: subscriber {} panicked on {}", id, event.event()),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CanonicalEvent;
    use std::sync::Mutex;

    #[test]
    fn test_publish_reaches_subscribers_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = seen.clone();
            bus.subscribe(move |_| seen.lock().unwrap().push(tag));
        }

        let delivered = bus.publish(&InputEvent::Pressed(CanonicalEvent::keyboard("K")));
        assert_eq!(delivered, 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let id = bus.subscribe(move |_| *c.lock().unwrap() += 1);

        bus.publish(&InputEvent::Pressed(CanonicalEvent::mouse("LeftButton")));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&InputEvent::Pressed(CanonicalEvent::mouse("LeftButton")));

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let bus = EventBus::new();
        let reached = Arc::new(Mutex::new(false));
        bus.subscribe(|_| panic!("subscriber failure"));
        let r = reached.clone();
        bus.subscribe(move |_| *r.lock().unwrap() = true);

        let delivered = bus.publish(&InputEvent::Released(CanonicalEvent::keyboard("Esc")));
        assert_eq!(delivered, 1);
        assert!(*reached.lock().unwrap());
    }
}
