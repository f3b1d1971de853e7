//! Event bus abstraction for post-commit notifications.
//!
//! Writes happen first; events describing them are published afterwards. A
//! listener on the other side of the bus therefore never observes a change that
//! could still roll back.
//!
//! ```text
//! ┌──────────────┐   commit    ┌─────────────┐  publish  ┌─────────────┐
//! │ HTTP request │ ──────────► │ repository  │ ────────► │  event bus  │
//! └──────────────┘             └─────────────┘           └──────┬──────┘
//!                                                               │ at-least-once
//!                                                               ▼
//!                                                        ┌─────────────┐
//!                                                        │  listener   │
//!                                                        └─────────────┘
//! ```
//!
//! # Delivery
//!
//! - **At-least-once**: Subscribers may see an event more than once and must be idempotent
//! - **Ordered per topic**: Events on one topic arrive in publish order
//! - **No replay**: A subscriber only receives events published after it subscribed
//!
//! Topics follow the pattern `{concern}-events`, e.g. `payment-events`.

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// The subscriber fell behind and events were dropped
    #[error("Subscriber lagged, {0} events skipped")]
    Lagged(u64),

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Generic error for other failures
    #[error("Event bus error: {0}")]
    Other(String),
}

/// Stream of events from subscriptions.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so that the
/// trait stays dyn-compatible: reducers capture an `Arc<dyn EventBus>` inside
/// publish effects.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of events.
    ///
    /// The subscription is live as soon as the returned future resolves.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
