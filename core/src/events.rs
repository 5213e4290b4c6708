//! Message bus for cross-subsystem notifications.
//!
//! [`MessageBus`] delivers events to handlers subscribed either to a single
//! event kind or to every event. Events can be dispatched immediately with
//! [`MessageBus::publish`], or queued with [`MessageBus::queue`] and
//! delivered later by [`MessageBus::process_queued`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use lumen_core::events::{Event, MessageBus};
//!
//! #[derive(Debug)]
//! enum WindowEvent {
//!     Resized(u32, u32),
//!     Closed,
//! }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum WindowEventKind {
//!     Resized,
//!     Closed,
//! }
//!
//! impl Event for WindowEvent {
//!     type Kind = WindowEventKind;
//!
//!     fn kind(&self) -> WindowEventKind {
//!         match self {
//!             Self::Resized(..) => WindowEventKind::Resized,
//!             Self::Closed => WindowEventKind::Closed,
//!         }
//!     }
//! }
//!
//! let resizes = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&resizes);
//!
//! let mut bus = MessageBus::new();
//! bus.subscribe(WindowEventKind::Resized, move |_| {
//!     counter.fetch_add(1, Ordering::Relaxed);
//! });
//!
//! bus.publish(WindowEvent::Resized(800, 600));
//! bus.publish(WindowEvent::Closed);
//! assert_eq!(resizes.load(Ordering::Relaxed), 1);
//! ```

use std::fmt;
use std::hash::Hash;

use rustc_hash::FxHashMap;

/// A message that can travel over a [`MessageBus`].
pub trait Event: fmt::Debug + Send + 'static {
    /// Discriminant used to route the event to subscribers.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send;

    /// Get the routing kind of this event.
    fn kind(&self) -> Self::Kind;
}

/// Handle returned by subscriptions, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Box<dyn FnMut(&E) + Send>;

struct Subscription<E: Event> {
    id: SubscriptionId,
    /// `None` receives every kind.
    kind: Option<E::Kind>,
    handler: Handler<E>,
}

/// Synchronous publish/subscribe bus over one event type.
pub struct MessageBus<E: Event> {
    subscriptions: Vec<Subscription<E>>,
    queued: Vec<E>,
    next_id: u64,
    published: FxHashMap<E::Kind, u64>,
}

impl<E: Event> MessageBus<E> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            queued: Vec::new(),
            next_id: 0,
            published: FxHashMap::default(),
        }
    }

    /// Subscribe to one kind of event.
    pub fn subscribe(
        &mut self,
        kind: E::Kind,
        handler: impl FnMut(&E) + Send + 'static,
    ) -> SubscriptionId {
        self.add_subscription(Some(kind), Box::new(handler))
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&mut self, handler: impl FnMut(&E) + Send + 'static) -> SubscriptionId {
        self.add_subscription(None, Box::new(handler))
    }

    fn add_subscription(&mut self, kind: Option<E::Kind>, handler: Handler<E>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription { id, kind, handler });
        id
    }

    /// Remove a subscription. Returns `false` if it was not found.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        before != self.subscriptions.len()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Deliver an event to every matching subscriber right away.
    pub fn publish(&mut self, event: E) {
        let kind = event.kind();
        log::trace!("MessageBus: publishing {:?}", kind);
        *self.published.entry(kind).or_insert(0) += 1;

        for subscription in &mut self.subscriptions {
            if subscription.kind.map_or(true, |k| k == kind) {
                (subscription.handler)(&event);
            }
        }
    }

    /// Queue an event for [`process_queued`](Self::process_queued).
    pub fn queue(&mut self, event: E) {
        self.queued.push(event);
    }

    /// Number of queued events.
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Publish every queued event in FIFO order. Returns how many were sent.
    ///
    /// Only events queued before the call are sent. Handlers receive `&E`
    /// and have no access to the bus, so they cannot queue more.
    pub fn process_queued(&mut self) -> usize {
        let queued = std::mem::take(&mut self.queued);
        let count = queued.len();
        for event in queued {
            self.publish(event);
        }
        count
    }

    /// How many events of a kind have been published so far.
    pub fn published_count(&self, kind: E::Kind) -> u64 {
        self.published.get(&kind).copied().unwrap_or(0)
    }
}

impl<E: Event> Default for MessageBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for MessageBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("subscriptions", &self.subscriptions.len())
            .field("queued", &self.queued.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Ping(u32),
        Pong,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestKind {
        Ping,
        Pong,
    }

    impl Event for TestEvent {
        type Kind = TestKind;

        fn kind(&self) -> TestKind {
            match self {
                Self::Ping(_) => TestKind::Ping,
                Self::Pong => TestKind::Pong,
            }
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<TestEvent>>>, impl FnMut(&TestEvent) + Send + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, move |e: &TestEvent| sink.lock().unwrap().push(e.clone()))
    }

    #[test]
    fn test_subscribe_filters_by_kind() {
        let mut bus = MessageBus::new();
        let (pings, handler) = recorder();
        bus.subscribe(TestKind::Ping, handler);

        bus.publish(TestEvent::Ping(1));
        bus.publish(TestEvent::Pong);
        bus.publish(TestEvent::Ping(2));

        assert_eq!(*pings.lock().unwrap(), vec![TestEvent::Ping(1), TestEvent::Ping(2)]);
        assert_eq!(bus.published_count(TestKind::Ping), 2);
        assert_eq!(bus.published_count(TestKind::Pong), 1);
    }

    #[test]
    fn test_subscribe_all() {
        let mut bus = MessageBus::new();
        let (all, handler) = recorder();
        bus.subscribe_all(handler);

        bus.publish(TestEvent::Ping(1));
        bus.publish(TestEvent::Pong);
        assert_eq!(all.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let mut bus = MessageBus::new();
        let (all, handler) = recorder();
        let id = bus.subscribe_all(handler);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(TestEvent::Pong);
        assert!(all.lock().unwrap().is_empty());
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_queue_is_deferred() {
        let mut bus = MessageBus::new();
        let (all, handler) = recorder();
        bus.subscribe_all(handler);

        bus.queue(TestEvent::Ping(1));
        bus.queue(TestEvent::Ping(2));
        assert!(all.lock().unwrap().is_empty());
        assert_eq!(bus.queued_count(), 2);

        assert_eq!(bus.process_queued(), 2);
        assert_eq!(*all.lock().unwrap(), vec![TestEvent::Ping(1), TestEvent::Ping(2)]);
        assert_eq!(bus.queued_count(), 0);
    }
}
