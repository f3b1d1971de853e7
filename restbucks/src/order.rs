//! The `Order` aggregate and its status state machine.
//!
//! | from               | to               | operation             |
//! |--------------------|------------------|-----------------------|
//! | `PAYMENT_EXPECTED` | `PAID`           | [`Order::mark_paid`]  |
//! | `PAID`             | `IN_PREPARATION` | [`Order::mark_in_preparation`] |
//! | `IN_PREPARATION`   | `PREPARED`       | [`Order::mark_prepared`] |
//! | `PREPARED`         | `TAKEN`          | [`Order::mark_taken`] |
//!
//! Every other transition is rejected with [`OrderError::InvalidTransition`] and
//! leaves the order untouched.

use crate::types::{LineItem, Location, Money, OrderId, OrderStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by order operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// The requested status change is not allowed from the current status
    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: OrderStatus,
        /// Requested status
        to: OrderStatus,
    },

    /// An order needs at least one line item
    #[error("Order must contain at least one item")]
    NoItems,

    /// A line item was ordered zero times
    #[error("Item '{0}' has zero quantity")]
    ZeroQuantity(String),

    /// A line item has a negative or zero price
    #[error("Item '{0}' has invalid price")]
    InvalidPrice(String),

    /// The order total does not fit in the money type
    #[error("Order total is too large")]
    TotalTooLarge,
}

/// A customer's order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier
    pub id: OrderId,
    /// Drinks, in the order they were requested
    pub items: Vec<LineItem>,
    /// Take away or in store
    pub location: Location,
    /// Current status
    pub status: OrderStatus,
    /// When the order was placed
    pub ordered_at: DateTime<Utc>,
    /// Persistence version, `0` until first saved
    pub version: u64,
}

impl Order {
    /// Creates an order awaiting payment.
    ///
    /// # Errors
    ///
    /// - [`OrderError::NoItems`] if `items` is empty
    /// - [`OrderError::ZeroQuantity`] or [`OrderError::InvalidPrice`] for a bad item
    /// - [`OrderError::TotalTooLarge`] if `price * quantity` or the sum overflows
    pub fn new(
        id: OrderId,
        location: Location,
        items: Vec<LineItem>,
        ordered_at: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::ZeroQuantity(item.name.clone()));
            }
            if item.price.cents() <= 0 {
                return Err(OrderError::InvalidPrice(item.name.clone()));
            }
        }
        if checked_total(&items).is_none() {
            return Err(OrderError::TotalTooLarge);
        }

        Ok(Self {
            id,
            items,
            location,
            status: OrderStatus::PaymentExpected,
            ordered_at,
            version: 0,
        })
    }

    /// `PAYMENT_EXPECTED → PAID`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] from any other status.
    pub fn mark_paid(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::PaymentExpected, OrderStatus::Paid)
    }

    /// `PAID → IN_PREPARATION`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] from any other status.
    pub fn mark_in_preparation(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Paid, OrderStatus::InPreparation)
    }

    /// `IN_PREPARATION → PREPARED`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] from any other status.
    pub fn mark_prepared(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::InPreparation, OrderStatus::Prepared)
    }

    /// `PREPARED → TAKEN`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] from any other status.
    pub fn mark_taken(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Prepared, OrderStatus::Taken)
    }

    /// Whether payment has been received (any status after `PAYMENT_EXPECTED`).
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.status != OrderStatus::PaymentExpected
    }

    /// Whether the order can be picked up.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == OrderStatus::Prepared
    }

    /// Orders can only be cancelled before they are paid.
    #[must_use]
    pub fn can_cancel(&self) -> bool {
        self.status == OrderStatus::PaymentExpected
    }

    /// Sum of `price * quantity` over all items.
    ///
    /// [`Order::new`] rejects totals that overflow; an order built any other way
    /// saturates at the largest amount.
    #[must_use]
    pub fn total(&self) -> Money {
        checked_total(&self.items).unwrap_or(Money::from_cents(i64::MAX))
    }

    fn transition(&mut self, from: OrderStatus, to: OrderStatus) -> Result<(), OrderError> {
        if self.status != from {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

fn checked_total(items: &[LineItem]) -> Option<Money> {
    items
        .iter()
        .try_fold(Money::default(), |sum, item| sum.checked_add(item.total()?))
}
