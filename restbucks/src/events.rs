//! Events published on the event bus.

use crate::types::OrderId;
use chrono::{DateTime, Utc};
use restbucks_core::event::Event;
use serde::{Deserialize, Serialize};

/// Topic carrying payment notifications.
pub const PAYMENT_TOPIC: &str = "payment-events";

/// Event type identifier of [`OrderPaidEvent`].
pub const ORDER_PAID_EVENT_TYPE: &str = "OrderPaid.v1";

/// Raised once per successful payment, after the payment has been committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaidEvent {
    /// The order that was paid
    pub order_id: OrderId,
    /// When the payment was committed
    pub paid_at: DateTime<Utc>,
}

impl OrderPaidEvent {
    /// Creates the notification for a committed payment
    #[must_use]
    pub const fn new(order_id: OrderId, paid_at: DateTime<Utc>) -> Self {
        Self { order_id, paid_at }
    }
}

impl Event for OrderPaidEvent {
    fn event_type(&self) -> &'static str {
        ORDER_PAID_EVENT_TYPE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use restbucks_core::event::SerializedEvent;

    #[test]
    fn envelope_round_trips_through_bincode() {
        let event = OrderPaidEvent::new(OrderId::new("order-1"), Utc::now());

        let envelope = SerializedEvent::from_event(&event, None).unwrap();
        assert_eq!(envelope.event_type, ORDER_PAID_EVENT_TYPE);

        let decoded: OrderPaidEvent = envelope.decode(ORDER_PAID_EVENT_TYPE).unwrap();
        assert_eq!(decoded, event);
    }
}
