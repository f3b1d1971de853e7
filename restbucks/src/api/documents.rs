//! HAL representations of orders, payments and the API root.
//!
//! Links advertise what a client can do next: an order awaiting payment links to
//! `payment` and `cancel`, a paid order links to its `receipt`.

use crate::order::Order;
use crate::payment::Payment;
use crate::types::{LineItem, Location, Money, OrderId, OrderStatus};
use axum::{
    Json,
    http::header,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Media type of every document in this module.
pub const HAL_JSON: &str = "application/hal+json";

/// A HAL link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    /// Target URI
    pub href: String,
}

impl Link {
    fn to(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }
}

/// Link relations of a document.
pub type Links = BTreeMap<&'static str, Link>;

/// Renders a document as `application/hal+json`.
#[derive(Debug)]
pub struct Hal<T>(pub T);

impl<T: Serialize> IntoResponse for Hal<T> {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, HAL_JSON)], Json(self.0)).into_response()
    }
}

/// URI of an order.
#[must_use]
pub fn order_href(id: &OrderId) -> String {
    format!("/orders/{id}")
}

fn payment_href(id: &OrderId) -> String {
    format!("/orders/{id}/payment")
}

fn receipt_href(id: &OrderId) -> String {
    format!("/orders/{id}/receipt")
}

/// Entry point of the API.
#[derive(Debug, Serialize)]
pub struct RootDocument {
    /// `orders`
    #[serde(rename = "_links")]
    pub links: Links,
}

impl RootDocument {
    /// The root document
    #[must_use]
    pub fn new() -> Self {
        Self {
            links: Links::from([("orders", Link::to("/orders"))]),
        }
    }
}

impl Default for RootDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// An order.
#[derive(Debug, Serialize)]
pub struct OrderDocument {
    /// Order id
    pub id: OrderId,
    /// Current status
    pub status: OrderStatus,
    /// Take away or in store
    pub location: Location,
    /// Drinks
    pub items: Vec<LineItem>,
    /// Total in cents
    pub total: Money,
    /// When the order was placed
    pub ordered_at: DateTime<Utc>,
    /// `self`, and `payment`/`cancel` or `receipt` depending on status
    #[serde(rename = "_links")]
    pub links: Links,
}

impl From<Order> for OrderDocument {
    fn from(order: Order) -> Self {
        let mut links = Links::from([("self", Link::to(order_href(&order.id)))]);
        if order.can_cancel() {
            links.insert("payment", Link::to(payment_href(&order.id)));
            links.insert("cancel", Link::to(order_href(&order.id)));
        }
        if order.is_paid() {
            links.insert("receipt", Link::to(receipt_href(&order.id)));
        }

        Self {
            total: order.total(),
            id: order.id,
            status: order.status,
            location: order.location,
            items: order.items,
            ordered_at: order.ordered_at,
            links,
        }
    }
}

/// Every order.
#[derive(Debug, Serialize)]
pub struct OrdersDocument {
    /// Embedded order documents
    #[serde(rename = "_embedded")]
    pub embedded: EmbeddedOrders,
    /// `self`
    #[serde(rename = "_links")]
    pub links: Links,
}

/// `_embedded` section of [`OrdersDocument`].
#[derive(Debug, Serialize)]
pub struct EmbeddedOrders {
    /// Orders, oldest first
    pub orders: Vec<OrderDocument>,
}

impl From<Vec<Order>> for OrdersDocument {
    fn from(orders: Vec<Order>) -> Self {
        Self {
            embedded: EmbeddedOrders {
                orders: orders.into_iter().map(OrderDocument::from).collect(),
            },
            links: Links::from([("self", Link::to("/orders"))]),
        }
    }
}

/// A payment, also served as the receipt.
#[derive(Debug, Serialize)]
pub struct PaymentDocument {
    /// Amount charged, in cents
    pub amount: Money,
    /// Masked card number
    pub credit_card: String,
    /// When the payment committed
    pub paid_at: DateTime<Utc>,
    /// `self` (the receipt) and `order`
    #[serde(rename = "_links")]
    pub links: Links,
}

impl From<Payment> for PaymentDocument {
    fn from(payment: Payment) -> Self {
        Self {
            amount: payment.amount,
            credit_card: payment.card.masked(),
            paid_at: payment.paid_at,
            links: Links::from([
                ("self", Link::to(receipt_href(&payment.order_id))),
                ("order", Link::to(order_href(&payment.order_id))),
            ]),
        }
    }
}
