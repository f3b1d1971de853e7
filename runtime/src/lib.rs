//! # Restbucks Runtime
//!
//! The [`Store`] runs a [`Reducer`](restbucks_core::reducer::Reducer): it holds the
//! state, feeds actions through the reducer, executes the returned effects on tokio
//! tasks and routes the actions those effects produce back into the reducer.
//!
//! ```text
//!  send(action) ──► reducer ──► effects ──► tokio tasks
//!        ▲                                      │
//!        └──────────── feedback action ◄────────┘
//!                           │
//!                           └──► action broadcast (send_and_wait_for, observers)
//! ```
//!
//! Event bus publishes are retried with a [`RetryPolicy`]; a publish that keeps
//! failing lands in the store's [`DeadLetterQueue`].

pub mod dead_letter;
pub mod health;
pub mod metrics;
pub mod retry;
pub mod store;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use error::StoreError;
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use retry::RetryPolicy;
pub use store::{EffectHandle, FailedPublish, Store};

/// Store errors.
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timed out waiting for effects or for a terminal action
        #[error("Timeout waiting for action")]
        Timeout,

        /// The action broadcast channel closed while waiting
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

use std::time::Duration;

/// Configuration for [`Store`] instances.
///
/// ```
/// use restbucks_runtime::{RetryPolicy, StoreConfig};
/// use std::time::Duration;
///
/// let config = StoreConfig::named("payment")
///     .with_dlq_max_size(500)
///     .with_retry_policy(RetryPolicy::new().with_initial_delay(Duration::from_millis(200)));
/// assert_eq!(config.name, "payment");
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Component name used in logs and health checks
    pub name: String,
    /// Maximum size of the dead letter queue
    pub dlq_max_size: usize,
    /// Retry policy for event bus publishes
    pub retry_policy: RetryPolicy,
    /// Capacity of the action broadcast channel
    pub broadcast_capacity: usize,
}

impl StoreConfig {
    /// Default configuration with a component name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the DLQ maximum size
    #[must_use]
    pub const fn with_dlq_max_size(mut self, max_size: usize) -> Self {
        self.dlq_max_size = max_size;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the action broadcast capacity.
    ///
    /// Raise it when many concurrent `send_and_wait_for` callers risk lagging.
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            dlq_max_size: 1000,
            retry_policy: RetryPolicy::default(),
            broadcast_capacity: 64,
        }
    }
}

/// Interval at which `Store::shutdown` re-checks pending effects.
pub(crate) const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(20);
