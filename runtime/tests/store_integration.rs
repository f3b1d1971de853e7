//! Store behaviour seen from the outside: request/response waits, observers and
//! event publishing with retries.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use restbucks_core::effect::Effect;
use restbucks_core::event::SerializedEvent;
use restbucks_core::event_bus::EventBus;
use restbucks_core::reducer::Reducer;
use restbucks_core::{SmallVec, publish_event, smallvec};
use restbucks_runtime::{RetryPolicy, Store, StoreConfig, StoreError};
use restbucks_testing::mocks::{FailingEventBus, InMemoryEventBus};
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "barista-events";

#[derive(Debug, Clone, PartialEq)]
enum BaristaAction {
    Brew { ticket: u32 },
    StepDone { ticket: u32, step: u32 },
    Served { ticket: u32 },
    Announce { ticket: u32 },
    Announced { ticket: u32 },
    AnnounceFailed { ticket: u32, error: String },
}

#[derive(Debug, Default)]
struct BaristaState {
    steps: Vec<(u32, u32)>,
    announced: Vec<u32>,
    failed: Vec<u32>,
}

#[derive(Clone)]
struct BaristaEnv {
    bus: Arc<dyn EventBus>,
}

#[derive(Clone)]
struct BaristaReducer;

impl Reducer for BaristaReducer {
    type State = BaristaState;
    type Action = BaristaAction;
    type Environment = BaristaEnv;

    fn reduce(
        &self,
        state: &mut BaristaState,
        action: BaristaAction,
        env: &BaristaEnv,
    ) -> SmallVec<[Effect<BaristaAction>; 4]> {
        match action {
            BaristaAction::Brew { ticket } => smallvec![Effect::Future(Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Some(BaristaAction::StepDone { ticket, step: 1 })
            }))],
            BaristaAction::StepDone { ticket, step } => {
                state.steps.push((ticket, step));
                if step < 3 {
                    smallvec![Effect::Future(Box::pin(async move {
                        Some(BaristaAction::StepDone { ticket, step: step + 1 })
                    }))]
                } else {
                    smallvec![Effect::Future(Box::pin(async move {
                        Some(BaristaAction::Served { ticket })
                    }))]
                }
            },
            BaristaAction::Served { .. } => smallvec![Effect::None],
            BaristaAction::Announce { ticket } => {
                let event =
                    SerializedEvent::new("TicketReady.v1".to_string(), ticket.to_le_bytes().to_vec(), None);
                smallvec![publish_event! {
                    bus: env.bus,
                    topic: TOPIC,
                    event: event,
                    on_success: || Some(BaristaAction::Announced { ticket }),
                    on_error: |error| Some(BaristaAction::AnnounceFailed { ticket, error: error.to_string() })
                }]
            },
            BaristaAction::Announced { ticket } => {
                state.announced.push(ticket);
                smallvec![Effect::None]
            },
            BaristaAction::AnnounceFailed { ticket, .. } => {
                state.failed.push(ticket);
                smallvec![Effect::None]
            },
        }
    }
}

type BaristaStore = Store<BaristaState, BaristaAction, BaristaEnv, BaristaReducer>;

fn store_with(bus: Arc<dyn EventBus>, attempts: u32) -> BaristaStore {
    let config = StoreConfig::named("barista").with_retry_policy(
        RetryPolicy::new()
            .with_max_attempts(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5)),
    );
    Store::with_config(BaristaState::default(), BaristaReducer, BaristaEnv { bus }, config)
}

fn store() -> BaristaStore {
    store_with(Arc::new(InMemoryEventBus::new()), 3)
}

#[tokio::test]
async fn send_and_wait_for_follows_a_multi_step_chain() {
    let store = store();

    let result = store
        .send_and_wait_for(
            BaristaAction::Brew { ticket: 7 },
            |a| matches!(a, BaristaAction::Served { ticket: 7 }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(result, BaristaAction::Served { ticket: 7 });
    let steps = store.state(|s| s.steps.clone()).await;
    assert_eq!(steps, vec![(7, 1), (7, 2), (7, 3)]);
}

#[tokio::test]
async fn send_and_wait_for_times_out_without_a_match() {
    let store = store();

    let result = store
        .send_and_wait_for(
            BaristaAction::Brew { ticket: 1 },
            |a| matches!(a, BaristaAction::AnnounceFailed { .. }),
            Duration::from_millis(50),
        )
        .await;

    assert!(matches!(result, Err(StoreError::Timeout)));
}

#[tokio::test]
async fn concurrent_waiters_each_get_their_own_result() {
    let store = store();

    let mut tasks = Vec::new();
    for ticket in 1..=5 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .send_and_wait_for(
                    BaristaAction::Brew { ticket },
                    move |a| matches!(a, BaristaAction::Served { ticket: t } if *t == ticket),
                    Duration::from_secs(2),
                )
                .await
        }));
    }

    for (index, task) in tasks.into_iter().enumerate() {
        let ticket = u32::try_from(index).unwrap() + 1;
        assert_eq!(task.await.unwrap().unwrap(), BaristaAction::Served { ticket });
    }
}

#[tokio::test]
async fn observers_see_feedback_actions_but_not_the_initial_one() {
    let store = store();
    let mut rx = store.subscribe_actions();

    store.send(BaristaAction::Brew { ticket: 3 }).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, BaristaAction::StepDone { ticket: 3, step: 1 });
}

#[tokio::test]
async fn published_events_reach_the_bus() {
    let bus = Arc::new(InMemoryEventBus::new());
    let store = store_with(bus.clone(), 3);

    let result = store
        .send_and_wait_for(
            BaristaAction::Announce { ticket: 9 },
            |a| matches!(a, BaristaAction::Announced { .. } | BaristaAction::AnnounceFailed { .. }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(result, BaristaAction::Announced { ticket: 9 });
    let published = bus.published_to(TOPIC);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event_type, "TicketReady.v1");
}

#[tokio::test]
async fn transient_publish_failures_are_retried() {
    let bus = Arc::new(FailingEventBus::failing_first(2));
    let store = store_with(bus.clone(), 3);

    let result = store
        .send_and_wait_for(
            BaristaAction::Announce { ticket: 4 },
            |a| matches!(a, BaristaAction::Announced { .. } | BaristaAction::AnnounceFailed { .. }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(result, BaristaAction::Announced { ticket: 4 });
    assert_eq!(bus.attempts(), 3);
    assert!(store.dlq().is_empty());
}

#[tokio::test]
async fn exhausted_publish_lands_in_the_dead_letter_queue() {
    let store = store_with(Arc::new(FailingEventBus::always()), 2);

    let result = store
        .send_and_wait_for(
            BaristaAction::Announce { ticket: 5 },
            |a| matches!(a, BaristaAction::Announced { .. } | BaristaAction::AnnounceFailed { .. }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert!(matches!(result, BaristaAction::AnnounceFailed { ticket: 5, .. }));
    let entry = store.dlq().peek().expect("failed publish should be parked");
    assert_eq!(entry.payload.topic, TOPIC);
    assert_eq!(entry.attempts, 2);
}

#[tokio::test]
async fn shutdown_waits_for_running_effects() {
    let store = store();

    store.send(BaristaAction::Brew { ticket: 2 }).await.unwrap();
    store.shutdown(Duration::from_secs(1)).await.unwrap();

    // Feedback actions of effects already running are still reduced during drain.
    let steps = store.state(|s| s.steps.len()).await;
    assert_eq!(steps, 3);
    assert_eq!(store.pending_effects(), 0);
}
