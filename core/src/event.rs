//! Event trait and the serialized envelope that travels over the event bus.
//!
//! Events are immutable facts. In Restbucks they are raised after a write has
//! committed (for example `OrderPaid.v1` after a payment) and are delivered to
//! listeners through an [`EventBus`](crate::event_bus::EventBus).
//!
//! Payloads are encoded with `bincode`; the envelope carries the stable event
//! type identifier so consumers can route before decoding.
//!
//! # Example
//!
//! ```
//! use restbucks_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct OrderPaid {
//!     order_id: String,
//! }
//!
//! impl Event for OrderPaid {
//!     fn event_type(&self) -> &'static str {
//!         "OrderPaid.v1"
//!     }
//! }
//! ```

use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// The envelope carried an event type the consumer does not understand.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// An event that can be published on the event bus.
///
/// `event_type()` returns a stable, versioned identifier such as
/// `"OrderPaid.v1"`. Bump the suffix when the payload shape changes.
pub trait Event: Send + Sync + 'static {
    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the bytes are not a valid
    /// encoding of `Self`.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// A serialized event ready for transport.
#[derive(Clone, Debug)]
pub struct SerializedEvent {
    /// Versioned event type identifier (e.g. `"OrderPaid.v1"`)
    pub event_type: String,

    /// Bincode-encoded payload
    pub data: Vec<u8>,

    /// Optional JSON metadata (correlation ids and the like)
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Creates a new serialized event from raw parts.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Serializes a typed event into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
            metadata,
        })
    }

    /// Decodes the payload as `E`, checking the event type first.
    ///
    /// # Errors
    ///
    /// - [`EventError::UnknownEventType`] if the envelope type differs from `expected_type`
    /// - [`EventError::DeserializationError`] if the payload cannot be decoded
    pub fn decode<E>(&self, expected_type: &str) -> Result<E, EventError>
    where
        E: Event + DeserializeOwned,
    {
        if self.event_type != expected_type {
            return Err(EventError::UnknownEventType(self.event_type.clone()));
        }
        E::from_bytes(&self.data)
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
