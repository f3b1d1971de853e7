//! End-to-end behaviour of asynchronous order processing.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Utc;
use futures::StreamExt;
use restbucks::payment::PaymentAction;
use restbucks::processing::ProcessingError;
use restbucks::repository::RepositoryFuture;
use restbucks::{
    Application, Config, CreditCardNumber, InMemoryOrderRepository, LineItem, Location, Milk, Money, Order,
    OrderId, OrderPaidEvent, OrderRepository, OrderStatus, PAYMENT_TOPIC, Size,
};
use restbucks_core::environment::SystemClock;
use restbucks_core::event::SerializedEvent;
use restbucks_core::event_bus::EventBus;
use restbucks_testing::init_test_tracing;
use restbucks_testing::mocks::{FailingEventBus, InMemoryEventBus};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Repository that records the status of every successful save.
#[derive(Clone, Default)]
struct RecordingRepository {
    inner: InMemoryOrderRepository,
    saves: Arc<Mutex<Vec<(OrderId, OrderStatus)>>>,
}

impl RecordingRepository {
    fn statuses_of(&self, id: &OrderId) -> Vec<OrderStatus> {
        self.saves
            .lock()
            .unwrap()
            .iter()
            .filter(|(saved, _)| saved == id)
            .map(|(_, status)| *status)
            .collect()
    }

    fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }
}

impl OrderRepository for RecordingRepository {
    fn find<'a>(&'a self, id: &'a OrderId) -> RepositoryFuture<'a, Option<Order>> {
        self.inner.find(id)
    }

    fn find_all(&self) -> RepositoryFuture<'_, Vec<Order>> {
        self.inner.find_all()
    }

    fn save(&self, order: Order) -> RepositoryFuture<'_, Order> {
        Box::pin(async move {
            let saved = self.inner.save(order).await?;
            self.saves.lock().unwrap().push((saved.id.clone(), saved.status));
            Ok(saved)
        })
    }

    fn delete<'a>(&'a self, id: &'a OrderId, expected_version: u64) -> RepositoryFuture<'a, ()> {
        self.inner.delete(id, expected_version)
    }
}

struct Harness {
    app: Application,
    repository: RecordingRepository,
    bus: InMemoryEventBus,
}

fn config(preparation_time: Duration) -> Config {
    let mut config = Config::default();
    config.processing.preparation_time_ms = u64::try_from(preparation_time.as_millis()).unwrap();
    config.processing.consumer_retry_ms = 10;
    config.server.request_timeout_ms = 2_000;
    config.server.shutdown_timeout_secs = 5;
    config
}

async fn harness(preparation_time: Duration) -> Harness {
    init_test_tracing();

    let repository = RecordingRepository::default();
    let bus = InMemoryEventBus::new();
    let app = Application::build_with(
        config(preparation_time),
        Arc::new(repository.clone()),
        Arc::new(bus.clone()),
        Arc::new(SystemClock),
    )
    .await
    .unwrap();

    Harness { app, repository, bus }
}

impl Harness {
    async fn place_order(&self) -> OrderId {
        let order = Order::new(
            OrderId::generate(),
            Location::InStore,
            vec![LineItem::new("Americano", 1, Milk::Whole, Size::Medium, Money::from_cents(290))],
            Utc::now(),
        )
        .unwrap();
        self.repository.save(order).await.unwrap().id
    }

    async fn pay(&self, order_id: &OrderId) -> PaymentAction {
        let id = order_id.clone();
        self.app
            .payments()
            .send_and_wait_for(
                PaymentAction::PayOrder {
                    order_id: order_id.clone(),
                    card: CreditCardNumber::parse("1234123412341234").unwrap(),
                },
                move |action| match action {
                    PaymentAction::PaymentCompleted { payment } => payment.order_id == id,
                    PaymentAction::PaymentFailed { order_id, .. } => *order_id == id,
                    _ => false,
                },
                Duration::from_secs(2),
            )
            .await
            .unwrap()
    }

    async fn status(&self, order_id: &OrderId) -> Option<OrderStatus> {
        self.repository.find(order_id).await.unwrap().map(|o| o.status)
    }

    async fn wait_for_status(&self, order_id: &OrderId, status: OrderStatus) {
        eventually(|| async { self.status(order_id).await == Some(status) })
            .await
            .unwrap_or_else(|()| panic!("order {order_id} never reached {status}"));
    }

    async fn publish_order_paid(&self, order_id: &OrderId) {
        let event = SerializedEvent::from_event(&OrderPaidEvent::new(order_id.clone(), Utc::now()), None).unwrap();
        self.bus.publish(PAYMENT_TOPIC, &event).await.unwrap();
    }
}

async fn eventually<F, Fut>(mut check: F) -> Result<(), ()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| ())
}

#[tokio::test]
async fn paid_order_is_eventually_prepared() {
    let h = harness(Duration::from_millis(50)).await;
    let order_id = h.place_order().await;

    assert!(matches!(h.pay(&order_id).await, PaymentAction::PaymentCompleted { .. }));
    h.wait_for_status(&order_id, OrderStatus::Prepared).await;

    let processor = h.app.processor();
    eventually(|| async { processor.state(|s| s.completed.contains(&order_id)).await })
        .await
        .unwrap();
    assert!(processor.state(|s| s.in_flight.is_empty()).await);
}

#[tokio::test]
async fn persisted_statuses_follow_the_exact_sequence() {
    let h = harness(Duration::from_millis(50)).await;
    let order_id = h.place_order().await;

    h.pay(&order_id).await;
    h.wait_for_status(&order_id, OrderStatus::Prepared).await;

    assert_eq!(
        h.repository.statuses_of(&order_id),
        [
            OrderStatus::PaymentExpected,
            OrderStatus::Paid,
            OrderStatus::InPreparation,
            OrderStatus::Prepared,
        ]
    );
}

#[tokio::test]
async fn order_paid_is_published_after_the_payment_committed() {
    let h = harness(Duration::from_secs(10)).await;
    let order_id = h.place_order().await;
    let mut stream = h.bus.subscribe(&[PAYMENT_TOPIC]).await.unwrap();

    h.pay(&order_id).await;

    let envelope = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let event: OrderPaidEvent = envelope.decode(restbucks::ORDER_PAID_EVENT_TYPE).unwrap();
    assert_eq!(event.order_id, order_id);
    assert_ne!(h.status(&order_id).await, Some(OrderStatus::PaymentExpected));
    assert_eq!(h.bus.published_to(PAYMENT_TOPIC).len(), 1);
}

#[tokio::test]
async fn unrelated_orders_neither_block_nor_trigger_each_other() {
    let h = harness(Duration::from_millis(400)).await;
    let x = h.place_order().await;
    let y = h.place_order().await;
    let z = h.place_order().await;

    h.pay(&x).await;
    h.wait_for_status(&x, OrderStatus::InPreparation).await;

    // Y's preparation starts while X is still being prepared.
    h.pay(&y).await;
    h.wait_for_status(&y, OrderStatus::InPreparation).await;
    assert_eq!(h.status(&x).await, Some(OrderStatus::InPreparation));

    h.wait_for_status(&x, OrderStatus::Prepared).await;
    h.wait_for_status(&y, OrderStatus::Prepared).await;

    assert_eq!(h.status(&z).await, Some(OrderStatus::PaymentExpected));
    assert_eq!(h.repository.statuses_of(&z), [OrderStatus::PaymentExpected]);
}

#[tokio::test]
async fn unknown_order_fails_without_writes() {
    let h = harness(Duration::from_millis(50)).await;
    let unknown = OrderId::new("order-does-not-exist");

    h.publish_order_paid(&unknown).await;

    let processor = h.app.processor();
    eventually(|| async { processor.state(|s| !s.failed.is_empty()).await })
        .await
        .unwrap();

    let failed = processor.state(|s| s.failed.clone()).await;
    assert_eq!(failed, vec![(unknown.clone(), ProcessingError::OrderNotFound(unknown))]);
    assert_eq!(h.repository.save_count(), 0);
}

#[tokio::test]
async fn duplicate_notification_is_processed_once() {
    let h = harness(Duration::from_millis(200)).await;
    let order_id = h.place_order().await;

    h.pay(&order_id).await;
    h.wait_for_status(&order_id, OrderStatus::InPreparation).await;
    h.publish_order_paid(&order_id).await;

    h.wait_for_status(&order_id, OrderStatus::Prepared).await;

    let processor = h.app.processor();
    eventually(|| async { processor.state(|s| s.in_flight.is_empty()).await })
        .await
        .unwrap();
    assert!(processor.state(|s| s.failed.is_empty()).await);
    assert_eq!(
        h.repository.statuses_of(&order_id),
        [
            OrderStatus::PaymentExpected,
            OrderStatus::Paid,
            OrderStatus::InPreparation,
            OrderStatus::Prepared,
        ]
    );
}

#[tokio::test]
async fn shutdown_interrupts_preparation_and_leaves_the_order_in_preparation() {
    let h = harness(Duration::from_secs(30)).await;
    let order_id = h.place_order().await;

    h.pay(&order_id).await;
    h.wait_for_status(&order_id, OrderStatus::InPreparation).await;

    let processor = h.app.processor();
    let Harness { app, repository, .. } = h;
    tokio::time::timeout(Duration::from_secs(5), app.shutdown())
        .await
        .expect("shutdown should not wait for the preparation time")
        .unwrap();

    assert_eq!(
        repository.find(&order_id).await.unwrap().map(|o| o.status),
        Some(OrderStatus::InPreparation)
    );
    let failed = processor.state(|s| s.failed.clone()).await;
    assert_eq!(failed, vec![(order_id.clone(), ProcessingError::Interrupted(order_id))]);
    assert!(processor.state(|s| s.completed.is_empty()).await);
}

#[tokio::test]
async fn shutdown_right_after_payment_still_starts_preparation() {
    init_test_tracing();
    let repository = RecordingRepository::default();
    let bus = FailingEventBus::failing_first(1);
    let h = Harness {
        app: Application::build_with(
            config(Duration::from_secs(30)),
            Arc::new(repository.clone()),
            Arc::new(bus.clone()),
            Arc::new(SystemClock),
        )
        .await
        .unwrap(),
        repository,
        bus: bus.inner().clone(),
    };
    let order_id = h.place_order().await;

    assert!(matches!(h.pay(&order_id).await, PaymentAction::PaymentCompleted { .. }));

    let processor = h.app.processor();
    let Harness { app, repository, .. } = h;
    app.shutdown().await.unwrap();

    assert!(bus.attempts() >= 2);
    assert_eq!(
        repository.find(&order_id).await.unwrap().map(|o| o.status),
        Some(OrderStatus::InPreparation)
    );
    let failed = processor.state(|s| s.failed.clone()).await;
    assert_eq!(failed, vec![(order_id.clone(), ProcessingError::Interrupted(order_id))]);
}

#[tokio::test]
async fn second_payment_is_rejected_and_not_published() {
    let h = harness(Duration::from_secs(10)).await;
    let order_id = h.place_order().await;

    h.pay(&order_id).await;
    let second = h.pay(&order_id).await;

    assert!(matches!(
        second,
        PaymentAction::PaymentFailed {
            failure: restbucks::PaymentFailure::AlreadyPaid(_),
            ..
        }
    ));
    eventually(|| async { h.bus.published_to(PAYMENT_TOPIC).len() == 1 })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.bus.published_to(PAYMENT_TOPIC).len(), 1);
}
