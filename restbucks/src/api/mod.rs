//! HTTP API.
//!
//! | method   | path                   | effect                                   |
//! |----------|------------------------|------------------------------------------|
//! | `GET`    | `/`                    | HAL root linking to `orders`             |
//! | `GET`    | `/orders`              | every order                              |
//! | `POST`   | `/orders`              | place an order                           |
//! | `GET`    | `/orders/:id`          | one order                                |
//! | `DELETE` | `/orders/:id`          | cancel an order awaiting payment         |
//! | `PUT`    | `/orders/:id/payment`  | pay, body `{"number": "<16 digits>"}`    |
//! | `GET`    | `/orders/:id/receipt`  | the receipt of a paid order              |
//! | `DELETE` | `/orders/:id/receipt`  | take a prepared order                    |
//! | `GET`    | `/health`              | liveness                                 |
//! | `GET`    | `/health/ready`        | readiness of the payment and processor stores |

pub mod documents;
pub mod handlers;

use crate::payment::PaymentStore;
use crate::processing::ProcessorStore;
use crate::repository::OrderRepository;
use axum::{
    Router,
    routing::{get, put},
};
use restbucks_core::environment::Clock;
use restbucks_web::correlation_id_layer;
use restbucks_web::handlers::health_check;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    /// Order storage
    pub repository: Arc<dyn OrderRepository>,
    /// Payments and receipt pickup
    pub payments: Arc<PaymentStore>,
    /// Order processor (health only)
    pub processor: Arc<ProcessorStore>,
    /// Clock for `ordered_at`
    pub clock: Arc<dyn Clock>,
    /// How long a request waits for the payment store
    pub request_timeout: Duration,
}

/// Build the router with tracing and correlation-id layers.
///
/// ```ignore
/// let app = restbucks::api::router(state);
/// axum::serve(listener, app).await?;
/// ```
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/orders", get(handlers::list_orders).post(handlers::place_order))
        .route(
            "/orders/:id",
            get(handlers::get_order).delete(handlers::cancel_order),
        )
        .route("/orders/:id/payment", put(handlers::pay_order))
        .route(
            "/orders/:id/receipt",
            get(handlers::get_receipt).delete(handlers::take_receipt),
        )
        .route("/health", get(health_check))
        .route("/health/ready", get(handlers::readiness))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
}
