//! Typed in-process event bus
//!
//! Fan-out pub/sub keyed by [`EventType`]. Handlers for one publish run
//! concurrently; the publisher returns once all of them have completed
//! or failed. A failing handler is logged and never affects its
//! siblings or the publisher. The bus keeps a bounded history of the
//! most recent events for debugging.

use futures_util::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error};

use crate::models::{Event, EventType};

/// Async event handler. Registered under a `(event type, name)` pair;
/// the name gives failures a loggable identity.
pub type EventHandler =
    Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

const MAX_HISTORY: usize = 1000;

struct Subscriber {
    name: String,
    handler: EventHandler,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventType, Vec<Subscriber>>>,
    history: RwLock<VecDeque<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type` under `name`.
    ///
    /// Idempotent: re-registering an existing `(event_type, name)` pair
    /// is a no-op.
    pub fn subscribe<F>(&self, event_type: EventType, name: &str, handler: F)
    where
        F: Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers.write();
        let entry = subscribers.entry(event_type).or_default();
        if entry.iter().any(|s| s.name == name) {
            return;
        }
        entry.push(Subscriber {
            name: name.to_string(),
            handler: Arc::new(handler),
        });
        debug!(event_type = %event_type, handler = %name, "subscriber added");
    }

    /// Remove the handler registered under `(event_type, name)`.
    /// Unknown pairs are a no-op.
    pub fn unsubscribe(&self, event_type: EventType, name: &str) {
        let mut subscribers = self.subscribers.write();
        if let Some(entry) = subscribers.get_mut(&event_type) {
            entry.retain(|s| s.name != name);
        }
    }

    /// Deliver `event` to every handler subscribed to its type.
    ///
    /// Handlers run concurrently; this returns when all have finished.
    /// Handler errors are logged with the handler name and swallowed.
    pub async fn publish(&self, event: Event) {
        self.record(event.clone());

        let handlers: Vec<(String, EventHandler)> = {
            let subscribers = self.subscribers.read();
            match subscribers.get(&event.event_type) {
                Some(entry) => entry
                    .iter()
                    .map(|s| (s.name.clone(), Arc::clone(&s.handler)))
                    .collect(),
                None => return,
            }
        };

        let futures = handlers
            .iter()
            .map(|(_, handler)| handler(event.clone()));
        let results = join_all(futures).await;

        for ((name, _), result) in handlers.iter().zip(results) {
            if let Err(err) = result {
                error!(
                    handler = %name,
                    event_type = %event.event_type,
                    error = %err,
                    "handler failed"
                );
            }
        }
    }

    fn record(&self, event: Event) {
        let mut history = self.history.write();
        history.push_back(event);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    /// Last events in publish order, oldest first. Bounded and lossy.
    pub fn history(&self) -> Vec<Event> {
        self.history.read().iter().cloned().collect()
    }

    /// History filtered to one event type.
    pub fn history_of(&self, event_type: EventType) -> Vec<Event> {
        self.history
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Total registered handlers across all event types.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Side, Signal, Tick};
    use chrono::Utc;
    use futures_util::FutureExt;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tick_event() -> Event {
        Event::tick(Tick {
            symbol: "AAPL".to_string(),
            last: dec!(150.00),
            bid: dec!(149.99),
            ask: dec!(150.01),
            volume: 1000,
            timestamp: Utc::now(),
        })
    }

    fn signal_event() -> Event {
        Event::signal(Signal::new("test", "AAPL", Side::Buy, 0.8))
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> impl Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> {
        move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn subscribe_and_publish() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventType::Tick, "test.handler", counting_handler(count.clone()));
        bus.publish(tick_event()).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventType::Tick, "a", counting_handler(a.clone()));
        bus.subscribe(EventType::Tick, "b", counting_handler(b.clone()));
        bus.publish(tick_event()).await;

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_cross_type_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventType::Tick, "test.handler", counting_handler(count.clone()));
        bus.publish(signal_event()).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_failure_is_isolated() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventType::Tick, "bad", |_event| {
            async { Err(anyhow::anyhow!("boom")) }.boxed()
        });
        bus.subscribe(EventType::Tick, "good", counting_handler(count.clone()));

        for _ in 0..10 {
            bus.publish(tick_event()).await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventType::Tick, "test.handler", counting_handler(count.clone()));
        bus.subscribe(EventType::Tick, "test.handler", counting_handler(count.clone()));
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(tick_event()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventType::Tick, "test.handler", counting_handler(count.clone()));
        bus.unsubscribe(EventType::Tick, "test.handler");
        bus.publish(tick_event()).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_is_noop() {
        let bus = EventBus::new();
        bus.unsubscribe(EventType::Fill, "never.registered");
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn history_in_publish_order() {
        let bus = EventBus::new();
        for _ in 0..5 {
            bus.publish(tick_event()).await;
        }

        assert_eq!(bus.history().len(), 5);
        assert_eq!(bus.history_of(EventType::Tick).len(), 5);
        assert_eq!(bus.history_of(EventType::Signal).len(), 0);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let bus = EventBus::new();
        for _ in 0..1500 {
            bus.publish(tick_event()).await;
        }

        assert_eq!(bus.history().len(), 1000);
    }
}
