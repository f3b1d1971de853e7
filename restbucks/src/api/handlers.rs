//! HTTP handlers.
//!
//! Reads go straight to the repository or the payment state. Payments and receipt
//! pickups are sent to the payment store and the handler waits, with the request
//! timeout, for the action that settles them.

use super::AppState;
use super::documents::{Hal, OrderDocument, OrdersDocument, PaymentDocument, RootDocument, order_href};
use crate::order::{Order, OrderError};
use crate::payment::{CreditCardNumber, PaymentAction, PaymentFailure};
use crate::repository::{OrderRepository, RepositoryError};
use crate::types::{LineItem, Location, OrderId};
use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
};
use restbucks_core::environment::Clock;
use restbucks_runtime::HealthReport;
use restbucks_web::handlers::{HealthResponse, readiness_response};
use restbucks_web::{AppError, CorrelationId};
use serde::Deserialize;

/// Body of `POST /orders`.
#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    /// Defaults to `TAKE_AWAY`
    #[serde(default)]
    pub location: Location,
    /// Drinks
    pub items: Vec<LineItem>,
}

/// Body of `PUT /orders/:id/payment`.
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    /// 16-digit card number
    pub number: String,
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::not_found("Order", id),
            err @ RepositoryError::ConcurrentModification { .. } => Self::conflict(err.to_string()),
            err @ RepositoryError::Unavailable(_) => Self::internal("An internal error occurred").with_source(err),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            err @ OrderError::InvalidTransition { .. } => Self::conflict(err.to_string()),
            other => Self::validation(other.to_string()),
        }
    }
}

impl From<PaymentFailure> for AppError {
    fn from(failure: PaymentFailure) -> Self {
        match failure {
            PaymentFailure::OrderNotFound(id) => Self::not_found("Order", id),
            failure @ (PaymentFailure::AlreadyPaid(_) | PaymentFailure::NotReady { .. }) => {
                Self::conflict(failure.to_string())
            },
            PaymentFailure::InvalidTransition(err) => err.into(),
            PaymentFailure::Repository(err) => err.into(),
        }
    }
}

async fn load(state: &AppState, id: &OrderId) -> Result<Order, AppError> {
    state
        .repository
        .find(id)
        .await?
        .ok_or_else(|| AppError::not_found("Order", id))
}

/// `GET /`
#[allow(clippy::unused_async)]
pub async fn root() -> Hal<RootDocument> {
    Hal(RootDocument::new())
}

/// `GET /orders`
///
/// # Errors
///
/// 500 if the repository fails.
pub async fn list_orders(State(state): State<AppState>) -> Result<Hal<OrdersDocument>, AppError> {
    let orders = state.repository.find_all().await?;
    Ok(Hal(OrdersDocument::from(orders)))
}

/// `POST /orders`
///
/// # Errors
///
/// 422 for an order without items or with an invalid item.
pub async fn place_order(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, [(header::HeaderName, String); 1], Hal<OrderDocument>), AppError> {
    let order = Order::new(
        OrderId::generate(),
        request.location,
        request.items,
        state.clock.now(),
    )?;
    let order = state.repository.save(order).await?;

    tracing::info!(
        correlation_id = %correlation_id,
        order_id = %order.id,
        total = %order.total(),
        "Order placed"
    );

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, order_href(&order.id))],
        Hal(OrderDocument::from(order)),
    ))
}

/// `GET /orders/:id`
///
/// # Errors
///
/// 404 if there is no such order.
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Hal<OrderDocument>, AppError> {
    let order = load(&state, &OrderId::new(id)).await?;
    Ok(Hal(OrderDocument::from(order)))
}

/// `DELETE /orders/:id`, cancelling an order that has not been paid.
///
/// # Errors
///
/// - 404 if there is no such order
/// - 405 once the order has been paid
/// - 409 if the order changed between the check and the delete
pub async fn cancel_order(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = OrderId::new(id);
    let order = load(&state, &id).await?;

    if !order.can_cancel() {
        return Err(AppError::method_not_allowed(format!(
            "Order {id} can no longer be cancelled (status {})",
            order.status
        )));
    }

    state.repository.delete(&id, order.version).await?;
    tracing::info!(correlation_id = %correlation_id, order_id = %id, "Order cancelled");
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /orders/:id/payment`
///
/// Responds once the payment has committed. The `OrderPaid` notification is
/// published afterwards, outside this request.
///
/// # Errors
///
/// - 400 for a malformed card number
/// - 404 if there is no such order
/// - 409 if the order was already paid
/// - 408 if the payment does not settle within the request timeout
pub async fn pay_order(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Path(id): Path<String>,
    Json(request): Json<PaymentRequest>,
) -> Result<(StatusCode, Hal<PaymentDocument>), AppError> {
    let order_id = OrderId::new(id);
    let card = CreditCardNumber::parse(request.number.trim()).map_err(|e| AppError::bad_request(e.to_string()))?;

    tracing::info!(correlation_id = %correlation_id, order_id = %order_id, "Payment requested");

    let settled = state
        .payments
        .send_and_wait_for(
            PaymentAction::PayOrder {
                order_id: order_id.clone(),
                card,
            },
            |action| match action {
                PaymentAction::PaymentCompleted { payment } => payment.order_id == order_id,
                PaymentAction::PaymentFailed { order_id: failed, .. } => *failed == order_id,
                _ => false,
            },
            state.request_timeout,
        )
        .await?;

    match settled {
        PaymentAction::PaymentCompleted { payment } => {
            Ok((StatusCode::CREATED, Hal(PaymentDocument::from(payment))))
        },
        PaymentAction::PaymentFailed { failure, .. } => Err(failure.into()),
        other => Err(AppError::internal(format!("Unexpected payment outcome: {other:?}"))),
    }
}

/// `GET /orders/:id/receipt`
///
/// # Errors
///
/// 404 if the order has not been paid.
pub async fn get_receipt(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Hal<PaymentDocument>, AppError> {
    let order_id = OrderId::new(id);
    let payment = state
        .payments
        .state(|s| s.receipt(&order_id).cloned())
        .await
        .ok_or_else(|| AppError::not_found("Receipt", &order_id))?;

    Ok(Hal(PaymentDocument::from(payment)))
}

/// `DELETE /orders/:id/receipt`, handing a prepared order to the customer.
///
/// # Errors
///
/// - 404 if there is no such order
/// - 409 if the order is not `PREPARED`
/// - 408 if the pickup does not settle within the request timeout
pub async fn take_receipt(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Path(id): Path<String>,
) -> Result<Hal<OrderDocument>, AppError> {
    let order_id = OrderId::new(id);
    tracing::info!(correlation_id = %correlation_id, order_id = %order_id, "Pickup requested");

    let settled = state
        .payments
        .send_and_wait_for(
            PaymentAction::TakeReceipt {
                order_id: order_id.clone(),
            },
            |action| match action {
                PaymentAction::ReceiptTaken { order } => order.id == order_id,
                PaymentAction::ReceiptFailed { order_id: failed, .. } => *failed == order_id,
                _ => false,
            },
            state.request_timeout,
        )
        .await?;

    match settled {
        PaymentAction::ReceiptTaken { order } => Ok(Hal(OrderDocument::from(order))),
        PaymentAction::ReceiptFailed { failure, .. } => Err(failure.into()),
        other => Err(AppError::internal(format!("Unexpected pickup outcome: {other:?}"))),
    }
}

/// `GET /health/ready`, 503 while a store is unhealthy.
#[allow(clippy::unused_async)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    readiness_response(HealthReport::new(vec![
        state.payments.health(),
        state.processor.health(),
    ]))
}
