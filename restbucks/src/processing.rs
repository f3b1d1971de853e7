//! Asynchronous order processing.
//!
//! When an order has been paid the barista takes over: the order moves to
//! `IN_PREPARATION`, the drinks take a while, then it moves to `PREPARED`. Each
//! step is an effect whose completion triggers the next, so the steps of one order
//! are strictly serial while different orders overlap freely.
//!
//! ```text
//! OrderPaid ──► [load, mark_in_preparation, save] ──► PreparationStarted
//!                                                           │ wait
//!               PreparationFinished ◄── [mark_prepared, save] ◄── PreparationElapsed
//! ```
//!
//! A failed step ends processing of that order with `ProcessingFailed` or
//! `PreparationInterrupted`. Nothing is retried or compensated, so an interrupted
//! order stays `IN_PREPARATION`.

use crate::consumer::EventHandler;
use crate::events::{ORDER_PAID_EVENT_TYPE, OrderPaidEvent};
use crate::order::{Order, OrderError};
use crate::repository::{OrderRepository, RepositoryError};
use crate::types::OrderId;
use async_trait::async_trait;
use restbucks_core::effect::Effect;
use restbucks_core::event::SerializedEvent;
use restbucks_core::reducer::Reducer;
use restbucks_core::{SmallVec, async_effect, smallvec};
use restbucks_runtime::Store;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Default simulated preparation time.
pub const DEFAULT_PREPARATION_TIME: Duration = Duration::from_secs(5);

/// Why processing of an order stopped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// The paid order does not exist
    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    /// The preparation wait was interrupted
    #[error("Preparation of order {0} was interrupted")]
    Interrupted(OrderId),

    /// The order was not in the expected status
    #[error(transparent)]
    Transition(#[from] OrderError),

    /// Loading or saving the order failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Actions of the order processor.
#[derive(Clone, Debug)]
pub enum ProcessorAction {
    /// An order was paid and should be prepared
    OrderPaid {
        /// Paid order
        order_id: OrderId,
    },

    /// The order was saved as `IN_PREPARATION`
    PreparationStarted {
        /// The order as saved
        order: Order,
    },

    /// The preparation time is over
    PreparationElapsed {
        /// The order as saved when preparation started
        order: Order,
    },

    /// The order was saved as `PREPARED`
    PreparationFinished {
        /// The order as saved
        order: Order,
    },

    /// The preparation wait was interrupted
    PreparationInterrupted {
        /// Order id
        order_id: OrderId,
    },

    /// A step failed
    ProcessingFailed {
        /// Order id
        order_id: OrderId,
        /// Reason
        error: ProcessingError,
    },
}

/// Bookkeeping of the processor.
#[derive(Clone, Debug, Default)]
pub struct ProcessorState {
    /// Orders currently being processed
    pub in_flight: HashSet<OrderId>,
    /// Orders that reached `PREPARED`, in completion order
    pub completed: Vec<OrderId>,
    /// Orders whose processing failed
    pub failed: Vec<(OrderId, ProcessingError)>,
}

impl ProcessorState {
    /// Whether `order_id` is being processed right now.
    #[must_use]
    pub fn is_processing(&self, order_id: &OrderId) -> bool {
        self.in_flight.contains(order_id)
    }

    fn finish(&mut self, order_id: &OrderId) {
        self.in_flight.remove(order_id);
    }
}

/// Dependencies of the processor.
#[derive(Clone)]
pub struct ProcessorEnvironment {
    /// Order storage
    pub repository: Arc<dyn OrderRepository>,
    /// How long preparing an order takes
    pub preparation_time: Duration,
    interrupt: Arc<watch::Sender<bool>>,
}

impl ProcessorEnvironment {
    /// Creates a new processor environment
    #[must_use]
    pub fn new(repository: Arc<dyn OrderRepository>, preparation_time: Duration) -> Self {
        let (interrupt, _) = watch::channel(false);
        Self {
            repository,
            preparation_time,
            interrupt: Arc::new(interrupt),
        }
    }

    /// Interrupt every running and future preparation wait.
    pub fn interrupt(&self) {
        tracing::warn!("Interrupting order preparations");
        self.interrupt.send_replace(true);
    }

    /// Whether [`interrupt`](Self::interrupt) has been called.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        *self.interrupt.borrow()
    }

    fn interrupt_signal(&self) -> watch::Receiver<bool> {
        self.interrupt.subscribe()
    }
}

/// Reducer driving the preparation of paid orders.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessorReducer;

/// Store running the [`ProcessorReducer`].
pub type ProcessorStore = Store<ProcessorState, ProcessorAction, ProcessorEnvironment, ProcessorReducer>;

impl ProcessorReducer {
    /// Creates a new processor reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn start(repository: Arc<dyn OrderRepository>, order_id: &OrderId) -> Result<Order, ProcessingError> {
        let mut order = repository
            .find(order_id)
            .await?
            .ok_or_else(|| ProcessingError::OrderNotFound(order_id.clone()))?;

        order.mark_in_preparation()?;
        Ok(repository.save(order).await?)
    }

    async fn finish(repository: Arc<dyn OrderRepository>, mut order: Order) -> Result<Order, ProcessingError> {
        order.mark_prepared()?;
        Ok(repository.save(order).await?)
    }

    /// Resolves once the interrupt flag is set. Never resolves if the sender is gone.
    async fn interrupted(mut signal: watch::Receiver<bool>) {
        if signal.wait_for(|interrupted| *interrupted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Reducer for ProcessorReducer {
    type State = ProcessorState;
    type Action = ProcessorAction;
    type Environment = ProcessorEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            ProcessorAction::OrderPaid { order_id } => {
                if !state.in_flight.insert(order_id.clone()) {
                    tracing::warn!(order_id = %order_id, "Order is already being processed, ignoring duplicate notification");
                    return smallvec![Effect::None];
                }

                let repository = Arc::clone(&env.repository);
                smallvec![async_effect! {
                    let started = Self::start(repository, &order_id).await;
                    Some(match started {
                        Ok(order) => ProcessorAction::PreparationStarted { order },
                        Err(error) => ProcessorAction::ProcessingFailed { order_id, error },
                    })
                }]
            },

            ProcessorAction::PreparationStarted { order } => {
                tracing::info!(order_id = %order.id, status = %order.status, "Starting to process order");

                let preparation_time = env.preparation_time;
                let signal = env.interrupt_signal();
                smallvec![async_effect! {
                    tokio::select! {
                        () = tokio::time::sleep(preparation_time) => {
                            Some(ProcessorAction::PreparationElapsed { order })
                        }
                        () = Self::interrupted(signal) => {
                            Some(ProcessorAction::PreparationInterrupted { order_id: order.id })
                        }
                    }
                }]
            },

            ProcessorAction::PreparationElapsed { order } => {
                let repository = Arc::clone(&env.repository);
                let order_id = order.id.clone();

                smallvec![async_effect! {
                    Some(match Self::finish(repository, order).await {
                        Ok(order) => ProcessorAction::PreparationFinished { order },
                        Err(error) => ProcessorAction::ProcessingFailed { order_id, error },
                    })
                }]
            },

            ProcessorAction::PreparationFinished { order } => {
                tracing::info!(order_id = %order.id, status = %order.status, "Finished processing order");
                metrics::counter!("restbucks.orders.prepared").increment(1);

                state.finish(&order.id);
                state.completed.push(order.id);
                smallvec![Effect::None]
            },

            ProcessorAction::PreparationInterrupted { order_id } => {
                tracing::error!(order_id = %order_id, "Preparation interrupted, order stays in preparation");
                metrics::counter!("restbucks.orders.processing_failed").increment(1);

                state.finish(&order_id);
                state.failed.push((order_id.clone(), ProcessingError::Interrupted(order_id)));
                smallvec![Effect::None]
            },

            ProcessorAction::ProcessingFailed { order_id, error } => {
                tracing::error!(order_id = %order_id, error = %error, "Failed to process order");
                metrics::counter!("restbucks.orders.processing_failed").increment(1);

                state.finish(&order_id);
                state.failed.push((order_id, error));
                smallvec![Effect::None]
            },
        }
    }
}

/// Feeds `OrderPaid.v1` notifications from the event bus into the processor.
#[derive(Clone)]
pub struct OrderPaidHandler {
    store: Arc<ProcessorStore>,
}

impl OrderPaidHandler {
    /// Creates a handler dispatching to `store`
    #[must_use]
    pub const fn new(store: Arc<ProcessorStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for OrderPaidHandler {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if event.event_type != ORDER_PAID_EVENT_TYPE {
            tracing::debug!(event_type = %event.event_type, "Skipping event");
            return Ok(());
        }

        let paid: OrderPaidEvent = event.decode(ORDER_PAID_EVENT_TYPE)?;
        tracing::debug!(order_id = %paid.order_id, paid_at = %paid.paid_at, "Received order paid notification");

        self.store
            .send(ProcessorAction::OrderPaid {
                order_id: paid.order_id,
            })
            .await?;
        Ok(())
    }
}
