//! Application wiring and lifecycle.
//!
//! [`Application::build`] creates the repository, the event bus, both stores and
//! the order-processing listener, and subscribes the listener before returning.
//! [`Application::shutdown`] tears them down in dependency order:
//!
//! 1. Drain the payment store so pending `OrderPaid` publishes and their retries finish
//! 2. Stop the listener, which first hands every delivered notification to the processor
//! 3. Interrupt preparation waits and drain the processor

use crate::api::{self, AppState};
use crate::config::Config;
use crate::consumer::{ConsumerError, EventConsumer};
use crate::events::PAYMENT_TOPIC;
use crate::payment::{PaymentEnvironment, PaymentReducer, PaymentState, PaymentStore};
use crate::processing::{OrderPaidHandler, ProcessorEnvironment, ProcessorReducer, ProcessorState, ProcessorStore};
use crate::repository::{InMemoryOrderRepository, OrderRepository};
use axum::Router;
use restbucks_core::environment::{Clock, SystemClock};
use restbucks_core::event_bus::EventBus;
use restbucks_runtime::{StoreConfig, StoreError};
use restbucks_testing::mocks::InMemoryEventBus;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A fully wired Restbucks service.
pub struct Application {
    config: Config,
    repository: Arc<dyn OrderRepository>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    payments: Arc<PaymentStore>,
    processor: Arc<ProcessorStore>,
    shutdown_tx: broadcast::Sender<()>,
    listener: JoinHandle<()>,
}

impl Application {
    /// Wire the service with an in-memory repository and event bus.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError`] if the order-processing listener cannot subscribe.
    pub async fn build(config: Config) -> Result<Self, ConsumerError> {
        let event_bus = Arc::new(InMemoryEventBus::with_capacity(config.processing.bus_capacity));
        Self::build_with(
            config,
            Arc::new(InMemoryOrderRepository::new()),
            event_bus,
            Arc::new(SystemClock),
        )
        .await
    }

    /// Wire the service around the given repository, bus and clock.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError`] if the order-processing listener cannot subscribe.
    pub async fn build_with(
        config: Config,
        repository: Arc<dyn OrderRepository>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConsumerError> {
        let payments = Arc::new(PaymentStore::with_config(
            PaymentState::default(),
            PaymentReducer::new(),
            PaymentEnvironment::new(Arc::clone(&repository), Arc::clone(&event_bus), Arc::clone(&clock)),
            StoreConfig::named("payments"),
        ));

        let processor = Arc::new(ProcessorStore::with_config(
            ProcessorState::default(),
            ProcessorReducer::new(),
            ProcessorEnvironment::new(Arc::clone(&repository), config.preparation_time()),
            StoreConfig::named("processor"),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        let listener = EventConsumer::builder()
            .name("order-processor")
            .topics(vec![PAYMENT_TOPIC.to_string()])
            .event_bus(Arc::clone(&event_bus))
            .handler(Arc::new(OrderPaidHandler::new(Arc::clone(&processor))))
            .shutdown(shutdown_tx.subscribe())
            .retry_delay(config.consumer_retry_delay())
            .build()?
            .start()
            .await?;

        tracing::info!(
            preparation_time_ms = config.processing.preparation_time_ms,
            "Restbucks application wired"
        );

        Ok(Self {
            config,
            repository,
            event_bus,
            clock,
            payments,
            processor,
            shutdown_tx,
            listener,
        })
    }

    /// The HTTP router.
    #[must_use]
    pub fn router(&self) -> Router {
        api::router(AppState {
            repository: Arc::clone(&self.repository),
            payments: Arc::clone(&self.payments),
            processor: Arc::clone(&self.processor),
            clock: Arc::clone(&self.clock),
            request_timeout: self.config.request_timeout(),
        })
    }

    /// Configuration the application was built with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Order storage.
    #[must_use]
    pub fn repository(&self) -> Arc<dyn OrderRepository> {
        Arc::clone(&self.repository)
    }

    /// Event bus carrying `OrderPaid.v1`.
    #[must_use]
    pub fn event_bus(&self) -> Arc<dyn EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// Payment store.
    #[must_use]
    pub fn payments(&self) -> Arc<PaymentStore> {
        Arc::clone(&self.payments)
    }

    /// Order processor store.
    #[must_use]
    pub fn processor(&self) -> Arc<ProcessorStore> {
        Arc::clone(&self.processor)
    }

    /// Drain payments, stop the listener, then drain the processor.
    ///
    /// A payment committed before shutdown still reaches the processor, so its
    /// order leaves `PAID`. Preparations still waiting are interrupted and their
    /// orders stay `IN_PREPARATION`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if a store does not drain within the
    /// configured shutdown timeout.
    pub async fn shutdown(self) -> Result<(), StoreError> {
        let timeout = self.config.shutdown_timeout();
        tracing::info!(timeout_secs = timeout.as_secs(), "Shutting down");

        self.payments.shutdown(timeout).await?;

        let _ = self.shutdown_tx.send(());
        match tokio::time::timeout(timeout, self.listener).await {
            Ok(Ok(())) => tracing::info!("Order-processing listener stopped"),
            Ok(Err(error)) => tracing::warn!(error = %error, "Order-processing listener task failed"),
            Err(_) => tracing::warn!("Order-processing listener shutdown timed out"),
        }

        self.processor.environment().interrupt();
        self.processor.shutdown(timeout).await?;

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
