//! Event Bus for client notifications.
//!
//! Each client owns one bus and publishes its lifecycle and traffic on it.
//! Dispatch is synchronous: `emit` returns only after every subscriber has
//! seen the event, so per-client ordering is exactly the order of the I/O
//! calls that produced the events.
//!
//! Handlers run on whatever task emitted the event (often the receive loop).
//! They must not block.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::infrastructure::error::ClientError;

/// Notification published by a protocol client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The connection finished establishing.
    Connected,
    /// The connection was torn down.
    Disconnected,
    /// Decoded inbound text (a raw console chunk or one command-socket frame).
    MessageReceived(String),
    /// A fault the client handled internally.
    Error(Arc<ClientError>),
}

impl ClientEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Connected => "connected",
            ClientEvent::Disconnected => "disconnected",
            ClientEvent::MessageReceived(_) => "message",
            ClientEvent::Error(_) => "error",
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync + 'static>;

#[derive(Clone)]
enum Subscriber {
    Callback(Callback),
    Channel(mpsc::UnboundedSender<ClientEvent>),
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(SubscriptionId, Subscriber)>,
}

/// Subscription list for [`ClientEvent`]s.
///
/// Cloning yields another handle to the same list.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    /// Create a new EventBus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, subscriber: Subscriber) -> SubscriptionId {
        let mut subs = self.lock();
        subs.next_id += 1;
        let id = SubscriptionId(subs.next_id);
        subs.entries.push((id, subscriber));
        id
    }

    /// Register a callback invoked for every event.
    pub fn subscribe(
        &self,
        callback: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add(Subscriber::Callback(Arc::new(callback)))
    }

    /// Register a channel that receives a clone of every event.
    ///
    /// The subscription is dropped automatically once the receiver is gone.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add(Subscriber::Channel(tx));
        rx
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.lock();
        let before = subs.entries.len();
        subs.entries.retain(|(entry_id, _)| *entry_id != id);
        subs.entries.len() != before
    }

    /// Deliver an event to every subscriber, in subscription order.
    ///
    /// Iterates a snapshot, so handlers may subscribe or unsubscribe
    /// without deadlocking.
    pub fn emit(&self, event: ClientEvent) {
        let snapshot: Vec<(SubscriptionId, Subscriber)> = self.lock().entries.clone();

        let mut closed = Vec::new();
        for (id, subscriber) in snapshot {
            match subscriber {
                Subscriber::Callback(callback) => callback(&event),
                Subscriber::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.lock().entries.retain(|(id, _)| !closed.contains(id));
        }
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Clear all subscribers.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_subscribe_and_emit() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU32::new(0));

        let count_clone = Arc::clone(&count);
        bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(ClientEvent::Connected);
        bus.emit(ClientEvent::Disconnected);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_emit_is_synchronous_and_ordered() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        bus.subscribe(move |event| first.lock().unwrap().push(format!("a:{}", event.kind())));
        let second = Arc::clone(&seen);
        bus.subscribe(move |event| second.lock().unwrap().push(format!("b:{}", event.kind())));

        bus.emit(ClientEvent::Connected);
        bus.emit(ClientEvent::MessageReceived("hi".into()));

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["a:connected", "b:connected", "a:message", "b:message"]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU32::new(0));

        let count_clone = Arc::clone(&count);
        let id = bus.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        bus.emit(ClientEvent::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_can_subscribe_during_dispatch() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        bus.subscribe(move |_| {
            inner_bus.subscribe(|_| {});
        });

        bus.emit(ClientEvent::Connected);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_channel_subscriber_receives_clones() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_channel();

        bus.emit(ClientEvent::MessageReceived("state".into()));

        match rx.recv().await {
            Some(ClientEvent::MessageReceived(text)) => assert_eq!(text, "state"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_dropped_channel_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe_channel();
        drop(rx);

        bus.emit(ClientEvent::Connected);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
