//! # Restbucks
//!
//! A coffee-ordering service: customers place orders, pay for them, and pick them
//! up once the barista has prepared them.
//!
//! Preparation is asynchronous. Paying commits the order as `PAID` and only then
//! publishes an `OrderPaid.v1` event on the `payment-events` topic. The
//! order-processing listener picks it up outside the HTTP request and moves the
//! order through `IN_PREPARATION` to `PREPARED`.
//!
//! ```text
//!  PUT /orders/:id/payment
//!            │
//!            ▼
//!   ┌────────────────┐  commit   ┌────────────┐  OrderPaid.v1  ┌──────────────────┐
//!   │ payment store  │ ────────► │ repository │ ◄───────────── │ processor store  │
//!   └───────┬────────┘           └────────────┘    2 writes    └────────▲─────────┘
//!           │ publish                                                   │
//!           └──────────────────► payment-events ── EventConsumer ───────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`], [`order`]: domain values and the order state machine
//! - [`repository`]: versioned order storage
//! - [`payment`]: payment and receipt reducer
//! - [`processing`]: order preparation reducer and its event handler
//! - [`consumer`]: generic event bus consumer
//! - [`api`]: HAL/JSON HTTP API
//! - [`config`], [`app`]: configuration and wiring
//!
//! ## Example
//!
//! ```no_run
//! use restbucks::{Application, Config};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let app = Application::build(config).await?;
//!
//! let listener = tokio::net::TcpListener::bind(app.config().bind_address()).await?;
//! axum::serve(listener, app.router()).await?;
//! app.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod consumer;
pub mod events;
pub mod order;
pub mod payment;
pub mod processing;
pub mod repository;
pub mod types;

pub use app::Application;
pub use config::{Config, ConfigError};
pub use events::{ORDER_PAID_EVENT_TYPE, OrderPaidEvent, PAYMENT_TOPIC};
pub use order::{Order, OrderError};
pub use payment::{CreditCardNumber, Payment, PaymentAction, PaymentFailure, PaymentStore};
pub use processing::{ProcessingError, ProcessorAction, ProcessorEnvironment, ProcessorStore};
pub use repository::{InMemoryOrderRepository, OrderRepository, RepositoryError};
pub use types::{LineItem, Location, Milk, Money, OrderId, OrderStatus, Size};
