//! Metric names and recorders for the runtime.
//!
//! Everything goes through the `metrics` facade; installing an exporter is left to
//! the binary. [`describe_metrics`] registers descriptions so that an exporter can
//! show help text for each series.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Register descriptions for every runtime metric.
pub fn describe_metrics() {
    describe_counter!("store_actions_total", "Actions processed by stores");
    describe_histogram!(
        "store_reducer_duration_seconds",
        "Time spent inside reducers"
    );
    describe_counter!("store_effects_total", "Effects executed, by type");
    describe_counter!(
        "store_rejected_actions_total",
        "Actions rejected because the store was shutting down"
    );
    describe_counter!("event_bus_published_total", "Events published, by topic");
    describe_counter!(
        "event_bus_publish_errors_total",
        "Publishes that failed after all retries, by topic"
    );
    describe_histogram!(
        "event_bus_publish_duration_seconds",
        "Publish latency including retries"
    );
    describe_counter!("retry_attempts_total", "Retry attempts, by operation");
    describe_counter!("retry_successes_total", "Operations that succeeded after a retry");
    describe_counter!("retry_exhausted_total", "Operations that ran out of attempts");
    describe_gauge!("dlq_size", "Entries in the dead letter queue");
    describe_counter!("dlq_pushed_total", "Entries added to the dead letter queue");
    describe_counter!("dlq_dropped_total", "Entries evicted from a full dead letter queue");
}

/// Store recorders.
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record one reducer run.
    pub fn record_action(duration: Duration) {
        counter!("store_actions_total").increment(1);
        histogram!("store_reducer_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record execution of an effect of the given type.
    pub fn record_effect(kind: &'static str) {
        counter!("store_effects_total", "type" => kind).increment(1);
    }

    /// Record an action rejected during shutdown.
    pub fn record_rejected() {
        counter!("store_rejected_actions_total").increment(1);
    }
}

/// Event bus recorders.
pub struct EventBusMetrics;

impl EventBusMetrics {
    /// Record a successful publish.
    pub fn record_publish(topic: &str, duration: Duration) {
        counter!("event_bus_published_total", "topic" => topic.to_string()).increment(1);
        histogram!("event_bus_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a publish that failed for good.
    pub fn record_publish_error(topic: &str) {
        counter!("event_bus_publish_errors_total", "topic" => topic.to_string()).increment(1);
    }
}

/// Retry recorders.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt(operation: &str) {
        counter!("retry_attempts_total", "operation" => operation.to_string()).increment(1);
    }

    /// Record a success that needed at least one retry.
    pub fn record_success(operation: &str) {
        counter!("retry_successes_total", "operation" => operation.to_string()).increment(1);
    }

    /// Record an operation that ran out of attempts.
    pub fn record_exhausted(operation: &str) {
        counter!("retry_exhausted_total", "operation" => operation.to_string()).increment(1);
    }
}

/// Dead letter queue recorders.
pub struct DeadLetterMetrics;

impl DeadLetterMetrics {
    /// Record a push and the resulting queue size.
    pub fn record_push(size: usize) {
        counter!("dlq_pushed_total").increment(1);
        Self::record_size(size);
    }

    /// Record an eviction caused by a full queue.
    pub fn record_dropped() {
        counter!("dlq_dropped_total").increment(1);
    }

    /// Record the current queue size.
    pub fn record_size(size: usize) {
        // Queue sizes stay far below 2^52
        #[allow(clippy::cast_precision_loss)]
        gauge!("dlq_size").set(size as f64);
    }
}
