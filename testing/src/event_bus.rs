//! In-memory event bus implementations.
//!
//! [`InMemoryEventBus`] keeps one tokio broadcast channel per topic and records every
//! publish, which makes it usable both as the bus of a single-process deployment and
//! as a spy in tests. [`FailingEventBus`] wraps it and rejects publishes on demand.

use futures::stream::{self, StreamExt};
use restbucks_core::event::SerializedEvent;
use restbucks_core::event_bus::{EventBus, EventBusError, EventStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

type Topics = HashMap<String, broadcast::Sender<SerializedEvent>>;

/// Topic-based in-process event bus.
///
/// - Subscribers only see events published after they subscribed
/// - Events on one topic arrive in publish order
/// - A subscriber that falls more than `capacity` events behind receives
///   [`EventBusError::Lagged`] and continues with newer events
///
/// Clones share topics and history.
///
/// ```
/// use restbucks_core::event::SerializedEvent;
/// use restbucks_core::event_bus::EventBus;
/// use restbucks_testing::mocks::InMemoryEventBus;
///
/// # tokio_test::block_on(async {
/// let bus = InMemoryEventBus::new();
/// let event = SerializedEvent::new("OrderPaid.v1".to_string(), vec![1], None);
/// bus.publish("payment-events", &event).await.unwrap();
///
/// assert_eq!(bus.published_to("payment-events").len(), 1);
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryEventBus {
    topics: Arc<Mutex<Topics>>,
    history: Arc<Mutex<Vec<(String, SerializedEvent)>>>,
    capacity: usize,
}

impl InMemoryEventBus {
    /// Bus with a per-topic buffer of 256 events.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Bus with a custom per-topic buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Every publish so far, as `(topic, event)` pairs in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, SerializedEvent)> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events published to `topic`, in publish order.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<SerializedEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Number of live subscriptions on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drop every topic channel, ending all open subscription streams.
    ///
    /// Later publishes and subscriptions recreate the topics.
    pub fn close(&self) {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<SerializedEvent> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn topic_stream(mut rx: broadcast::Receiver<SerializedEvent>) -> EventStream {
    Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => yield Ok(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    yield Err(EventBusError::Lagged(skipped));
                },
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();

        Box::pin(async move {
            if topic.is_empty() {
                return Err(EventBusError::InvalidTopic(topic));
            }

            self.history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((topic.clone(), event.clone()));

            // No subscribers is not an error: the event is simply not delivered.
            let receivers = self.sender(&topic).send(event).unwrap_or(0);
            tracing::trace!(topic = %topic, receivers, "Event published in memory");
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();

        Box::pin(async move {
            if topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "no topics given".to_string(),
                });
            }
            if let Some(empty) = topics.iter().find(|t| t.is_empty()) {
                return Err(EventBusError::InvalidTopic(empty.clone()));
            }

            let streams: Vec<EventStream> = topics
                .iter()
                .map(|topic| topic_stream(self.sender(topic).subscribe()))
                .collect();

            Ok(stream::select_all(streams).boxed())
        })
    }
}

/// Event bus whose publishes fail on demand.
///
/// Successful publishes go to an inner [`InMemoryEventBus`], which also serves
/// subscriptions.
#[derive(Clone, Debug)]
pub struct FailingEventBus {
    inner: InMemoryEventBus,
    failures_left: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl FailingEventBus {
    /// Fail the first `failures` publishes, then behave normally.
    #[must_use]
    pub fn failing_first(failures: usize) -> Self {
        Self {
            inner: InMemoryEventBus::new(),
            failures_left: Arc::new(AtomicUsize::new(failures)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail every publish.
    #[must_use]
    pub fn always() -> Self {
        Self::failing_first(usize::MAX)
    }

    /// Publish attempts so far, failed or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The bus receiving the publishes that went through.
    #[must_use]
    pub const fn inner(&self) -> &InMemoryEventBus {
        &self.inner
    }
}

impl EventBus for FailingEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        if failed {
            let topic = topic.to_string();
            return Box::pin(async move {
                Err(EventBusError::PublishFailed {
                    topic,
                    reason: "broker unavailable".to_string(),
                })
            });
        }

        self.inner.publish(topic, event)
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        self.inner.subscribe(topics)
    }
}
