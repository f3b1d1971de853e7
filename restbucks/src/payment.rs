//! Payments and receipts.
//!
//! Paying for an order is one repository transaction: load the order, mark it
//! paid, save it. Only after that save has committed does the reducer publish an
//! [`OrderPaidEvent`], so the order-processing listener never sees a payment that
//! could still fail.
//!
//! ```text
//! PayOrder ──► [load, mark_paid, save] ──► PaymentCompleted ──► publish OrderPaid.v1
//!                        │                                            │
//!                        └──► PaymentFailed              OrderPaidPublished / PublishFailed
//! ```

use crate::events::{OrderPaidEvent, PAYMENT_TOPIC};
use crate::order::{Order, OrderError};
use crate::repository::{OrderRepository, RepositoryError};
use crate::types::{Money, OrderId, OrderStatus};
use chrono::{DateTime, Utc};
use restbucks_core::effect::Effect;
use restbucks_core::environment::Clock;
use restbucks_core::event::SerializedEvent;
use restbucks_core::event_bus::EventBus;
use restbucks_core::reducer::Reducer;
use restbucks_core::{SmallVec, async_effect, publish_event, smallvec};
use restbucks_runtime::Store;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Credit card
// ============================================================================

/// Rejected card number.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Credit card number must be exactly 16 digits")]
pub struct InvalidCardNumber;

/// A 16-digit credit card number.
///
/// `Debug` and [`masked`](Self::masked) only ever reveal the last four digits.
#[derive(Clone, PartialEq, Eq)]
pub struct CreditCardNumber(String);

impl CreditCardNumber {
    /// Validates and wraps a card number.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCardNumber`] unless `number` is exactly 16 ASCII digits.
    pub fn parse(number: &str) -> Result<Self, InvalidCardNumber> {
        if number.len() == 16 && number.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(number.to_string()))
        } else {
            Err(InvalidCardNumber)
        }
    }

    /// `************1234`
    #[must_use]
    pub fn masked(&self) -> String {
        let last_four = self.0.get(12..).unwrap_or_default();
        format!("{}{last_four}", "*".repeat(12))
    }
}

impl FromStr for CreditCardNumber {
    type Err = InvalidCardNumber;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for CreditCardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CreditCardNumber").field(&self.masked()).finish()
    }
}

/// A completed payment, also the receipt of the order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payment {
    /// Order that was paid
    pub order_id: OrderId,
    /// Amount charged
    pub amount: Money,
    /// Card used
    pub card: CreditCardNumber,
    /// When the payment committed
    pub paid_at: DateTime<Utc>,
}

// ============================================================================
// Failures
// ============================================================================

/// Why a payment or a receipt pickup failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentFailure {
    /// No order with this id
    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    /// The order is past `PAYMENT_EXPECTED`
    #[error("Order {0} has already been paid")]
    AlreadyPaid(OrderId),

    /// Receipt requested before the order was prepared
    #[error("Order {order_id} is not ready for pickup (status {status})")]
    NotReady {
        /// Order id
        order_id: OrderId,
        /// Current status
        status: OrderStatus,
    },

    /// The order rejected the status change
    #[error(transparent)]
    InvalidTransition(#[from] OrderError),

    /// The repository failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

// ============================================================================
// Reducer
// ============================================================================

/// Actions of the payment store.
#[derive(Clone, Debug)]
pub enum PaymentAction {
    /// Pay for an order (command)
    PayOrder {
        /// Order to pay
        order_id: OrderId,
        /// Card to charge
        card: CreditCardNumber,
    },

    /// The payment transaction committed
    PaymentCompleted {
        /// The stored payment
        payment: Payment,
    },

    /// The payment transaction did not commit
    PaymentFailed {
        /// Order id
        order_id: OrderId,
        /// Reason
        failure: PaymentFailure,
    },

    /// `OrderPaid.v1` reached the event bus
    OrderPaidPublished {
        /// Order id
        order_id: OrderId,
    },

    /// `OrderPaid.v1` could not be published after all retries
    PublishFailed {
        /// Order id
        order_id: OrderId,
        /// Last error
        error: String,
    },

    /// Pick up a prepared order (command)
    TakeReceipt {
        /// Order id
        order_id: OrderId,
    },

    /// The order was handed over
    ReceiptTaken {
        /// The order, now `TAKEN`
        order: Order,
    },

    /// The order could not be handed over
    ReceiptFailed {
        /// Order id
        order_id: OrderId,
        /// Reason
        failure: PaymentFailure,
    },
}

/// State of the payment store.
#[derive(Clone, Debug, Default)]
pub struct PaymentState {
    /// Committed payments by order
    pub payments: HashMap<OrderId, Payment>,
    /// Payments whose notification could not be published
    pub unpublished: Vec<OrderId>,
}

impl PaymentState {
    /// The receipt of an order, if it has been paid.
    #[must_use]
    pub fn receipt(&self, order_id: &OrderId) -> Option<&Payment> {
        self.payments.get(order_id)
    }
}

/// Dependencies of the payment reducer.
#[derive(Clone)]
pub struct PaymentEnvironment {
    /// Order storage
    pub repository: Arc<dyn OrderRepository>,
    /// Bus for `OrderPaid.v1`
    pub event_bus: Arc<dyn EventBus>,
    /// Clock for `paid_at`
    pub clock: Arc<dyn Clock>,
}

impl PaymentEnvironment {
    /// Creates a new payment environment
    #[must_use]
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            event_bus,
            clock,
        }
    }
}

/// Reducer for payments and receipt pickup.
#[derive(Clone, Copy, Debug, Default)]
pub struct PaymentReducer;

/// Store running the [`PaymentReducer`].
pub type PaymentStore = Store<PaymentState, PaymentAction, PaymentEnvironment, PaymentReducer>;

impl PaymentReducer {
    /// Creates a new payment reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn pay(
        repository: Arc<dyn OrderRepository>,
        order_id: OrderId,
        card: CreditCardNumber,
        paid_at: DateTime<Utc>,
    ) -> Result<Payment, PaymentFailure> {
        let mut order = repository
            .find(&order_id)
            .await?
            .ok_or_else(|| PaymentFailure::OrderNotFound(order_id.clone()))?;

        if order.is_paid() {
            return Err(PaymentFailure::AlreadyPaid(order_id));
        }

        order.mark_paid()?;
        let order = repository.save(order).await.map_err(|e| match e {
            RepositoryError::ConcurrentModification { .. } => PaymentFailure::AlreadyPaid(order_id.clone()),
            other => PaymentFailure::Repository(other),
        })?;

        Ok(Payment {
            amount: order.total(),
            order_id: order.id,
            card,
            paid_at,
        })
    }

    async fn take(repository: Arc<dyn OrderRepository>, order_id: OrderId) -> Result<Order, PaymentFailure> {
        let mut order = repository
            .find(&order_id)
            .await?
            .ok_or_else(|| PaymentFailure::OrderNotFound(order_id.clone()))?;

        if !order.is_ready() {
            return Err(PaymentFailure::NotReady {
                order_id,
                status: order.status,
            });
        }

        order.mark_taken()?;
        Ok(repository.save(order).await?)
    }

    fn publish_order_paid(payment: &Payment, env: &PaymentEnvironment) -> Effect<PaymentAction> {
        let order_id = payment.order_id.clone();
        let event = OrderPaidEvent::new(order_id.clone(), payment.paid_at);

        match SerializedEvent::from_event(&event, None) {
            Ok(serialized) => {
                let failed_id = order_id.clone();
                publish_event! {
                    bus: env.event_bus,
                    topic: PAYMENT_TOPIC,
                    event: serialized,
                    on_success: || Some(PaymentAction::OrderPaidPublished { order_id }),
                    on_error: |error| Some(PaymentAction::PublishFailed {
                        order_id: failed_id,
                        error: error.to_string(),
                    })
                }
            },
            Err(error) => async_effect! {
                Some(PaymentAction::PublishFailed {
                    order_id,
                    error: error.to_string(),
                })
            },
        }
    }
}

impl Reducer for PaymentReducer {
    type State = PaymentState;
    type Action = PaymentAction;
    type Environment = PaymentEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            PaymentAction::PayOrder { order_id, card } => {
                tracing::info!(order_id = %order_id, card = %card.masked(), "Processing payment");
                let repository = Arc::clone(&env.repository);
                let paid_at = env.clock.now();

                smallvec![async_effect! {
                    Some(match Self::pay(repository, order_id.clone(), card, paid_at).await {
                        Ok(payment) => PaymentAction::PaymentCompleted { payment },
                        Err(failure) => PaymentAction::PaymentFailed { order_id, failure },
                    })
                }]
            },

            PaymentAction::PaymentCompleted { payment } => {
                tracing::info!(order_id = %payment.order_id, amount = %payment.amount, "Payment completed");
                metrics::counter!("restbucks.payments.completed").increment(1);

                let effect = Self::publish_order_paid(&payment, env);
                state.payments.insert(payment.order_id.clone(), payment);
                smallvec![effect]
            },

            PaymentAction::PaymentFailed { order_id, failure } => {
                tracing::warn!(order_id = %order_id, error = %failure, "Payment failed");
                metrics::counter!("restbucks.payments.failed").increment(1);
                smallvec![Effect::None]
            },

            PaymentAction::OrderPaidPublished { order_id } => {
                tracing::debug!(order_id = %order_id, "Order paid notification published");
                smallvec![Effect::None]
            },

            PaymentAction::PublishFailed { order_id, error } => {
                tracing::error!(order_id = %order_id, error = %error, "Failed to publish order paid notification");
                state.unpublished.push(order_id);
                smallvec![Effect::None]
            },

            PaymentAction::TakeReceipt { order_id } => {
                let repository = Arc::clone(&env.repository);

                smallvec![async_effect! {
                    Some(match Self::take(repository, order_id.clone()).await {
                        Ok(order) => PaymentAction::ReceiptTaken { order },
                        Err(failure) => PaymentAction::ReceiptFailed { order_id, failure },
                    })
                }]
            },

            PaymentAction::ReceiptTaken { order } => {
                tracing::info!(order_id = %order.id, "Order taken");
                smallvec![Effect::None]
            },

            PaymentAction::ReceiptFailed { order_id, failure } => {
                tracing::warn!(order_id = %order_id, error = %failure, "Receipt pickup failed");
                smallvec![Effect::None]
            },
        }
    }
}
