//! Typed notification hub.
//!
//! Components that publish events (the live client, the audio recorder) own an
//! [`EventHub`]. Subscribers register a callback for one event kind and get a
//! [`Subscription`] guard back; dropping the guard unregisters the callback.
//!
//! Callbacks for a kind run synchronously, in registration order, on the task
//! that emits the event. The subscriber list is snapshotted before dispatch so
//! a callback may subscribe, unsubscribe or call back into the emitter.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// An event that can be routed by kind.
pub trait Notification: Send + Sync + 'static {
    /// Discriminant used as the registry key.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Kind of this event.
    fn kind(&self) -> Self::Kind;
}

/// Callback type for hub subscribers.
pub type EventCallback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E: Notification> {
    next_id: u64,
    subscribers: HashMap<E::Kind, Vec<(u64, EventCallback<E>)>>,
}

/// Registry mapping event kinds to ordered subscriber lists.
pub struct EventHub<E: Notification> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: Notification> EventHub<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                subscribers: HashMap::new(),
            })),
        }
    }

    /// Register `callback` for events of `kind`.
    pub fn subscribe<F>(&self, kind: E::Kind, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry
                .subscribers
                .entry(kind)
                .or_default()
                .push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            kind: format!("{kind:?}"),
            unregister: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    let mut registry = registry.lock();
                    if let Some(list) = registry.subscribers.get_mut(&kind) {
                        list.retain(|(sub_id, _)| *sub_id != id);
                        if list.is_empty() {
                            registry.subscribers.remove(&kind);
                        }
                    }
                }
            })),
        }
    }

    /// Deliver `event` to every subscriber of its kind, in registration order.
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<EventCallback<E>> = {
            let registry = self.registry.lock();
            match registry.subscribers.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };

        for callback in callbacks {
            callback(event);
        }
    }

    /// Number of subscribers currently registered for `kind`.
    pub fn subscriber_count(&self, kind: E::Kind) -> usize {
        self.registry
            .lock()
            .subscribers
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl<E: Notification> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for a hub registration. Unregisters when dropped.
#[must_use = "dropping a Subscription immediately unregisters the callback"]
pub struct Subscription {
    kind: String,
    unregister: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Unregister now. Equivalent to dropping the guard.
    pub fn unsubscribe(mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("active", &self.unregister.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Ping,
        Pong,
    }

    struct Event(Kind, u32);

    impl Notification for Event {
        type Kind = Kind;
        fn kind(&self) -> Kind {
            self.0
        }
    }

    #[test]
    fn test_emit_reaches_only_matching_kind() {
        let hub = EventHub::<Event>::new();
        let pings = Arc::new(AtomicUsize::new(0));
        let pongs = Arc::new(AtomicUsize::new(0));

        let p = pings.clone();
        let _a = hub.subscribe(Kind::Ping, move |_| {
            p.fetch_add(1, Ordering::SeqCst);
        });
        let p = pongs.clone();
        let _b = hub.subscribe(Kind::Pong, move |_| {
            p.fetch_add(1, Ordering::SeqCst);
        });

        hub.emit(&Event(Kind::Ping, 1));
        hub.emit(&Event(Kind::Ping, 2));

        assert_eq!(pings.load(Ordering::SeqCst), 2);
        assert_eq!(pongs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let hub = EventHub::<Event>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        let _first = hub.subscribe(Kind::Ping, move |e| o.lock().push(("first", e.1)));
        let o = order.clone();
        let _second = hub.subscribe(Kind::Ping, move |e| o.lock().push(("second", e.1)));

        hub.emit(&Event(Kind::Ping, 7));

        assert_eq!(*order.lock(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_drop_unregisters() {
        let hub = EventHub::<Event>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let sub = hub.subscribe(Kind::Ping, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hub.subscriber_count(Kind::Ping), 1);

        drop(sub);
        hub.emit(&Event(Kind::Ping, 1));

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(hub.subscriber_count(Kind::Ping), 0);
    }

    #[test]
    fn test_unsubscribe_inside_callback_does_not_deadlock() {
        let hub = Arc::new(EventHub::<Event>::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));

        let s = slot.clone();
        let c = count.clone();
        let sub = hub.subscribe(Kind::Ping, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            s.lock().take();
        });
        *slot.lock() = Some(sub);

        hub.emit(&Event(Kind::Ping, 1));
        hub.emit(&Event(Kind::Ping, 2));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_outliving_hub_is_harmless() {
        let hub = EventHub::<Event>::new();
        let sub = hub.subscribe(Kind::Pong, |_| {});
        drop(hub);
        sub.unsubscribe();
    }
}
