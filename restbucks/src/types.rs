//! Domain value types for the Restbucks ordering service.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh identifier of the form `order-<uuid>`.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("order-{}", uuid::Uuid::new_v4()))
    }

    /// Returns the inner identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Money amount in cents to avoid floating point issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new money amount from cents
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Multiplies the amount by a quantity, `None` on overflow.
    #[must_use]
    pub fn checked_times(self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(i64::from(quantity)).map(Self)
    }

    /// Adds two amounts, `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    #[allow(clippy::cast_precision_loss)] // Display only
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0 as f64 / 100.0)
    }
}

/// Milk used in a drink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Milk {
    /// Skimmed milk
    Skimmed,
    /// Semi-skimmed milk
    Semi,
    /// Whole milk
    Whole,
}

/// Cup size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Size {
    /// Small cup
    Small,
    /// Medium cup
    Medium,
    /// Large cup
    Large,
}

/// Where the order will be consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Location {
    /// Taken away by the customer
    #[default]
    TakeAway,
    /// Served in the store
    InStore,
}

/// Lifecycle status of an order.
///
/// Statuses only ever move forward:
/// `PAYMENT_EXPECTED → PAID → IN_PREPARATION → PREPARED → TAKEN`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Placed, waiting for payment
    PaymentExpected,
    /// Payment committed
    Paid,
    /// The barista is working on it
    InPreparation,
    /// Ready for pickup
    Prepared,
    /// Picked up (terminal)
    Taken,
}

impl OrderStatus {
    /// The status a successful transition from `self` leads to, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::PaymentExpected => Some(Self::Paid),
            Self::Paid => Some(Self::InPreparation),
            Self::InPreparation => Some(Self::Prepared),
            Self::Prepared => Some(Self::Taken),
            Self::Taken => None,
        }
    }

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PaymentExpected => "PAYMENT_EXPECTED",
            Self::Paid => "PAID",
            Self::InPreparation => "IN_PREPARATION",
            Self::Prepared => "PREPARED",
            Self::Taken => "TAKEN",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A drink on an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Drink name
    pub name: String,
    /// Number of cups
    pub quantity: u32,
    /// Milk
    pub milk: Milk,
    /// Cup size
    pub size: Size,
    /// Price of one cup
    pub price: Money,
}

impl LineItem {
    /// Creates a new line item
    #[must_use]
    pub fn new(name: impl Into<String>, quantity: u32, milk: Milk, size: Size, price: Money) -> Self {
        Self {
            name: name.into(),
            quantity,
            milk,
            size,
            price,
        }
    }

    /// Price times quantity, `None` if it does not fit.
    #[must_use]
    pub fn total(&self) -> Option<Money> {
        self.price.checked_times(self.quantity)
    }
}
