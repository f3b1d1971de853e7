//! Event bus consumer with automatic resubscription.
//!
//! ```text
//! subscribe ──► spawn ──► loop {
//!                             next event ──► handler (errors are logged, not fatal)
//!                             stream ended ──► wait retry_delay, subscribe again
//!                             shutdown ──► handle already-buffered events, stop
//!                         }
//! ```
//!
//! The first subscription happens in [`EventConsumer::start`], before the task is
//! spawned, so an event published right after `start` returns is not missed.

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use restbucks_core::event::SerializedEvent;
use restbucks_core::event_bus::{EventBus, EventBusError, EventStream};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Default delay before resubscribing.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Processes events delivered by an [`EventConsumer`].
///
/// Errors are logged by the consumer, which then carries on with the next event.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Any error the handler wants logged: undecodable payloads, a store that is
    /// shutting down, and so on.
    async fn handle(&self, event: &SerializedEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Errors building or starting a consumer.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// A required builder field was not set
    #[error("Consumer is missing required field '{0}'")]
    MissingField(&'static str),

    /// The initial subscription failed
    #[error(transparent)]
    Subscribe(#[from] EventBusError),
}

/// Long-running event bus consumer.
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl EventConsumer {
    /// Start configuring a consumer.
    ///
    /// ```rust,ignore
    /// let consumer = EventConsumer::builder()
    ///     .name("order-processor")
    ///     .topics(vec![PAYMENT_TOPIC.to_string()])
    ///     .event_bus(event_bus)
    ///     .handler(Arc::new(OrderPaidHandler::new(store)))
    ///     .shutdown(shutdown_tx.subscribe())
    ///     .build()?;
    /// let handle = consumer.start().await?;
    /// ```
    #[must_use]
    pub fn builder() -> EventConsumerBuilder {
        EventConsumerBuilder::default()
    }

    /// Consumer name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe, then run the consumer on a background task.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Subscribe`] if the first subscription fails.
    pub async fn start(self) -> Result<JoinHandle<()>, ConsumerError> {
        let stream = self.subscribe().await?;
        tracing::info!(consumer = %self.name, topics = ?self.topics, "Subscribed to event bus");

        Ok(tokio::spawn(self.run(stream)))
    }

    async fn subscribe(&self) -> Result<EventStream, EventBusError> {
        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        self.event_bus.subscribe(&topics).await
    }

    async fn run(mut self, stream: EventStream) {
        tracing::info!(consumer = %self.name, "Event consumer started");
        let mut stream = Some(stream);

        loop {
            if let Some(mut live) = stream.take() {
                if self.process_stream(&mut live).await.is_break() {
                    break;
                }
                tracing::warn!(
                    consumer = %self.name,
                    retry_delay_ms = self.retry_delay.as_millis(),
                    "Event stream ended, resubscribing"
                );
            }

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(self.retry_delay) => {},
            }

            match self.subscribe().await {
                Ok(live) => {
                    tracing::info!(consumer = %self.name, topics = ?self.topics, "Resubscribed to event bus");
                    stream = Some(live);
                },
                Err(error) => {
                    tracing::error!(consumer = %self.name, error = %error, "Failed to subscribe to event bus");
                },
            }
        }

        tracing::info!(consumer = %self.name, "Event consumer stopped");
    }

    /// Handle events until the stream ends (`Continue`) or shutdown (`Break`).
    ///
    /// On shutdown, events already delivered to the stream are handled before
    /// returning.
    async fn process_stream(&mut self, stream: &mut EventStream) -> std::ops::ControlFlow<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!(consumer = %self.name, "Event consumer received shutdown signal");
                    let mut drained = 0_usize;
                    while let Some(Some(next)) = stream.next().now_or_never() {
                        self.handle(next).await;
                        drained += 1;
                    }
                    if drained > 0 {
                        tracing::info!(consumer = %self.name, drained, "Handled buffered events before stopping");
                    }
                    return std::ops::ControlFlow::Break(());
                }
                next = stream.next() => match next {
                    Some(next) => self.handle(next).await,
                    None => return std::ops::ControlFlow::Continue(()),
                },
            }
        }
    }

    async fn handle(&self, next: Result<SerializedEvent, EventBusError>) {
        match next {
            Ok(event) => {
                if let Err(error) = self.handler.handle(&event).await {
                    tracing::error!(
                        consumer = %self.name,
                        event_type = %event.event_type,
                        error = %error,
                        "Failed to handle event"
                    );
                }
            },
            Err(error) => {
                tracing::error!(consumer = %self.name, error = %error, "Error receiving event from stream");
            },
        }
    }
}

/// Builder for [`EventConsumer`].
#[derive(Default)]
pub struct EventConsumerBuilder {
    name: Option<String>,
    topics: Option<Vec<String>>,
    event_bus: Option<Arc<dyn EventBus>>,
    handler: Option<Arc<dyn EventHandler>>,
    shutdown: Option<broadcast::Receiver<()>>,
    retry_delay: Option<Duration>,
}

impl EventConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Set event bus instance.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Set event handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set the resubscribe delay (default: 5 seconds).
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Build the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::MissingField`] if name, topics, event bus, handler
    /// or shutdown receiver were not set.
    pub fn build(self) -> Result<EventConsumer, ConsumerError> {
        Ok(EventConsumer {
            name: self.name.ok_or(ConsumerError::MissingField("name"))?,
            topics: self.topics.ok_or(ConsumerError::MissingField("topics"))?,
            event_bus: self.event_bus.ok_or(ConsumerError::MissingField("event_bus"))?,
            handler: self.handler.ok_or(ConsumerError::MissingField("handler"))?,
            shutdown: self.shutdown.ok_or(ConsumerError::MissingField("shutdown"))?,
            retry_delay: self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY),
        })
    }
}
