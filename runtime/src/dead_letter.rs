//! Dead letter queue for operations that failed after every retry.
//!
//! The store parks event publishes here when the bus keeps rejecting them, so an
//! operator can inspect them or publish them again by hand. The queue is bounded;
//! when it is full the oldest entry is evicted.

use crate::metrics::DeadLetterMetrics;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// A failed operation plus what is known about its failure.
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    /// The operation payload
    pub payload: T,
    /// How many attempts were made
    pub attempts: u32,
    /// Error message from the last attempt
    pub error_message: String,
    /// When the entry was parked
    pub failed_at: DateTime<Utc>,
}

/// Bounded, shared FIFO of [`DeadLetter`] entries.
///
/// Clones share the same underlying queue.
///
/// ```
/// use restbucks_runtime::DeadLetterQueue;
///
/// let dlq = DeadLetterQueue::new(2);
/// dlq.push("a", "timeout".to_string(), 5);
/// dlq.push("b", "timeout".to_string(), 5);
/// dlq.push("c", "timeout".to_string(), 5);
///
/// let payloads: Vec<_> = dlq.drain().into_iter().map(|e| e.payload).collect();
/// assert_eq!(payloads, vec!["b", "c"]);
/// ```
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    queue: Arc<Mutex<VecDeque<DeadLetter<T>>>>,
    max_size: usize,
}

impl<T> DeadLetterQueue<T> {
    /// Create an empty queue holding at most `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size: max_size.max(1),
        }
    }

    /// Park a failed operation, evicting the oldest entry if the queue is full.
    pub fn push(&self, payload: T, error_message: String, attempts: u32) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);

        if queue.len() >= self.max_size {
            queue.pop_front();
            DeadLetterMetrics::record_dropped();
            tracing::warn!(max_size = self.max_size, "DLQ at capacity, dropping oldest entry");
        }

        queue.push_back(DeadLetter {
            payload,
            attempts,
            error_message,
            failed_at: Utc::now(),
        });

        DeadLetterMetrics::record_push(queue.len());
        tracing::warn!(
            attempts,
            queue_size = queue.len(),
            "Operation added to dead letter queue"
        );
    }

    /// Number of parked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();
        DeadLetterMetrics::record_size(0);
        tracing::info!(count = entries.len(), "Drained dead letter queue");
        entries
    }

    /// Oldest entry, if any.
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Capacity of the queue.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
        }
    }
}

impl<T> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}
