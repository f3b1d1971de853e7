//! Order persistence.
//!
//! Every `save` is its own transaction: it either stores the whole order at the
//! next version or changes nothing. Saves are optimistic. The stored version must
//! match the version the caller loaded, so two writers racing on the same order
//! cannot silently overwrite each other.

use crate::order::Order;
use crate::types::OrderId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Errors returned by an [`OrderRepository`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// No order with this id
    #[error("Order {0} not found")]
    NotFound(OrderId),

    /// The order was changed by someone else since it was loaded
    #[error("Order {id} was modified concurrently (expected version {expected}, found {actual})")]
    ConcurrentModification {
        /// Order id
        id: OrderId,
        /// Version the caller loaded
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// The backing store failed
    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future returned by repository operations.
pub type RepositoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Storage for orders.
///
/// Dyn-compatible so reducers can hold an `Arc<dyn OrderRepository>` in their
/// environment.
pub trait OrderRepository: Send + Sync {
    /// Load an order.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if the store cannot be read.
    fn find<'a>(&'a self, id: &'a OrderId) -> RepositoryFuture<'a, Option<Order>>;

    /// Load every order, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if the store cannot be read.
    fn find_all(&self) -> RepositoryFuture<'_, Vec<Order>>;

    /// Persist an order and return it at its new version.
    ///
    /// A new order has version `0`; an existing order must carry the version that
    /// is currently stored.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::ConcurrentModification`] on a version mismatch
    /// - [`RepositoryError::NotFound`] when updating an order that was deleted
    fn save(&self, order: Order) -> RepositoryFuture<'_, Order>;

    /// Remove an order, provided it is still at `expected_version`.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::NotFound`] if there is no such order
    /// - [`RepositoryError::ConcurrentModification`] if the order was saved since it was read
    fn delete<'a>(&'a self, id: &'a OrderId, expected_version: u64) -> RepositoryFuture<'a, ()>;
}

/// In-memory repository for development and tests.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderRepository {
    /// Creates an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn save_now(&self, mut order: Order) -> Result<Order, RepositoryError> {
        let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);

        match orders.get(&order.id) {
            Some(stored) if stored.version != order.version => {
                return Err(RepositoryError::ConcurrentModification {
                    id: order.id,
                    expected: order.version,
                    actual: stored.version,
                });
            },
            None if order.version != 0 => return Err(RepositoryError::NotFound(order.id)),
            _ => {},
        }

        order.version += 1;
        orders.insert(order.id.clone(), order.clone());
        tracing::debug!(order_id = %order.id, status = %order.status, version = order.version, "Order saved");
        Ok(order)
    }
}

impl OrderRepository for InMemoryOrderRepository {
    fn find<'a>(&'a self, id: &'a OrderId) -> RepositoryFuture<'a, Option<Order>> {
        Box::pin(async move {
            Ok(self
                .orders
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(id)
                .cloned())
        })
    }

    fn find_all(&self) -> RepositoryFuture<'_, Vec<Order>> {
        Box::pin(async move {
            let mut orders: Vec<Order> = self
                .orders
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect();
            orders.sort_by(|a, b| a.ordered_at.cmp(&b.ordered_at).then_with(|| a.id.cmp(&b.id)));
            Ok(orders)
        })
    }

    fn save(&self, order: Order) -> RepositoryFuture<'_, Order> {
        Box::pin(async move { self.save_now(order) })
    }

    fn delete<'a>(&'a self, id: &'a OrderId, expected_version: u64) -> RepositoryFuture<'a, ()> {
        Box::pin(async move {
            let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
            let stored = orders.get(id).ok_or_else(|| RepositoryError::NotFound(id.clone()))?;
            if stored.version != expected_version {
                return Err(RepositoryError::ConcurrentModification {
                    id: id.clone(),
                    expected: expected_version,
                    actual: stored.version,
                });
            }
            orders.remove(id);
            tracing::debug!(order_id = %id, version = expected_version, "Order deleted");
            Ok(())
        })
    }
}
