//! The Store: runtime coordinator for a reducer.

use crate::metrics::{EventBusMetrics, StoreMetrics};
use crate::retry::{RetryExhausted, RetryPolicy, retry_with_backoff};
use crate::{DeadLetterQueue, HealthCheck, SHUTDOWN_POLL_INTERVAL, StoreConfig, StoreError};
use restbucks_core::SmallVec;
use restbucks_core::effect::{Effect, EventBusOperation};
use restbucks_core::event::SerializedEvent;
use restbucks_core::reducer::Reducer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, broadcast, watch};

/// A publish that exhausted its retries, kept for manual replay.
#[derive(Debug, Clone)]
pub struct FailedPublish {
    /// Destination topic
    pub topic: String,
    /// The event that could not be delivered
    pub event: SerializedEvent,
}

/// Handle for tracking completion of the effects started by one action.
///
/// Returned by [`Store::send`]. Only the effects returned directly for that action
/// are tracked; effects of feedback actions get their own handles.
///
/// ```ignore
/// let mut handle = store.send(ProcessorAction::OrderPaid { order_id }).await?;
/// handle.wait_with_timeout(Duration::from_secs(1)).await?;
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };
        let tracking = EffectTracking {
            counter,
            notifier: Arc::new(tx),
        };

        (handle, tracking)
    }

    /// A handle with nothing left to wait for.
    #[must_use]
    pub fn completed() -> Self {
        let (handle, _tracking) = Self::new();
        handle
    }

    /// Number of tracked effects still running.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.effects.load(Ordering::SeqCst)
    }

    /// Wait until every tracked effect has finished.
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                break;
            }
        }
    }

    /// [`wait`](Self::wait) with an upper bound.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if effects are still running after `timeout`.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Internal counterpart of an [`EffectHandle`], carried into effect tasks.
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: Arc<watch::Sender<()>>,
}

impl EffectTracking {
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Decrements both the handle counter and the store-wide pending counter on drop,
/// so a panicking effect task still releases its slot.
struct EffectGuard {
    tracking: EffectTracking,
    pending: Arc<AtomicUsize>,
}

impl Drop for EffectGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.tracking.decrement();
    }
}

/// The Store - runtime coordinator for a reducer
///
/// Owns the state (behind a `RwLock`), the reducer and its environment. The reducer
/// runs under the write lock; effects run afterwards on spawned tasks, and every
/// action they produce is broadcast to observers and sent back through the reducer.
///
/// Clones share state, queues and counters.
///
/// ```ignore
/// let store = Store::new(ProcessorState::default(), ProcessorReducer::new(), env);
/// store.send(ProcessorAction::OrderPaid { order_id }).await?;
/// let in_flight = store.state(|s| s.in_flight.len()).await;
/// ```
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    name: Arc<str>,
    state: Arc<RwLock<S>>,
    reducer: R,
    environment: E,
    retry_policy: RetryPolicy,
    dlq: DeadLetterQueue<FailedPublish>,
    shutdown: Arc<AtomicBool>,
    pending_effects: Arc<AtomicUsize>,
    action_broadcast: broadcast::Sender<A>,
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
    A: Clone + Send + std::fmt::Debug + 'static,
    S: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a store with the default [`StoreConfig`].
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self::with_config(initial_state, reducer, environment, StoreConfig::default())
    }

    /// Create a store with a custom configuration.
    #[must_use]
    pub fn with_config(initial_state: S, reducer: R, environment: E, config: StoreConfig) -> Self {
        let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));

        Self {
            name: Arc::from(config.name),
            state: Arc::new(RwLock::new(initial_state)),
            reducer,
            environment,
            retry_policy: config.retry_policy,
            dlq: DeadLetterQueue::new(config.dlq_max_size),
            shutdown: Arc::new(AtomicBool::new(false)),
            pending_effects: Arc::new(AtomicUsize::new(0)),
            action_broadcast,
        }
    }

    /// Component name from the configuration.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The environment the reducer runs with.
    #[must_use]
    pub const fn environment(&self) -> &E {
        &self.environment
    }

    /// Publishes that exhausted their retries.
    #[must_use]
    pub fn dlq(&self) -> DeadLetterQueue<FailedPublish> {
        self.dlq.clone()
    }

    /// Effects currently running across all actions.
    #[must_use]
    pub fn pending_effects(&self) -> usize {
        self.pending_effects.load(Ordering::Acquire)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Health of this store.
    ///
    /// Unhealthy once shutdown has started or the DLQ is full, degraded when the
    /// DLQ is more than half full.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let dlq_size = self.dlq.len();
        let dlq_capacity = self.dlq.max_size();

        let check = if self.is_shutting_down() {
            HealthCheck::unhealthy(&*self.name, "Store is shutting down")
        } else if dlq_size >= dlq_capacity {
            HealthCheck::unhealthy(&*self.name, "Dead letter queue is full")
        } else if dlq_size * 2 > dlq_capacity {
            HealthCheck::degraded(
                &*self.name,
                format!("Dead letter queue holds {dlq_size} of {dlq_capacity} entries"),
            )
        } else {
            HealthCheck::healthy(&*self.name)
        };

        check
            .with_metadata("dlq_size", dlq_size.to_string())
            .with_metadata("dlq_capacity", dlq_capacity.to_string())
            .with_metadata("pending_effects", self.pending_effects().to_string())
    }

    /// Stop accepting actions and wait for running effects to drain.
    ///
    /// Actions produced by effects that are already running are still reduced, so
    /// in-flight work can reach a terminal action before the store goes quiet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if effects are still running when
    /// `timeout` elapses.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        tracing::info!(store = %self.name, "Initiating graceful shutdown");
        self.shutdown.store(true, Ordering::Release);

        let start = Instant::now();
        loop {
            let pending = self.pending_effects();

            if pending == 0 {
                tracing::info!(store = %self.name, "All effects completed, shutdown successful");
                return Ok(());
            }

            if start.elapsed() >= timeout {
                tracing::error!(
                    store = %self.name,
                    pending_effects = pending,
                    "Shutdown timed out with effects still running"
                );
                return Err(StoreError::ShutdownTimeout(pending));
            }

            tracing::debug!(
                store = %self.name,
                pending_effects = pending,
                elapsed_ms = start.elapsed().as_millis(),
                "Waiting for effects to complete"
            );
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }

    /// Send an action to the store.
    ///
    /// Runs the reducer under the write lock, starts the returned effects and
    /// returns a handle for them. The call returns once effects have been started,
    /// not when they finish.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
    #[tracing::instrument(skip(self, action), fields(store = %self.name), name = "store_send")]
    pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
        if self.is_shutting_down() {
            tracing::warn!(?action, "Rejected action: store is shutting down");
            StoreMetrics::record_rejected();
            return Err(StoreError::ShutdownInProgress);
        }

        Ok(self.dispatch(action).await)
    }

    /// Send an action and wait for the first broadcast action matching `predicate`.
    ///
    /// Subscribes before sending, so a terminal action produced immediately is not
    /// missed. Only actions produced by effects are broadcast, never `action` itself.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ShutdownInProgress`] if the store is shutting down
    /// - [`StoreError::Timeout`] if no matching action arrives within `timeout`
    /// - [`StoreError::ChannelClosed`] if the broadcast channel closes
    pub async fn send_and_wait_for<F>(
        &self,
        action: A,
        predicate: F,
        timeout: Duration,
    ) -> Result<A, StoreError>
    where
        F: Fn(&A) -> bool,
    {
        let mut rx = self.action_broadcast.subscribe();

        self.send(action).await?;

        tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(action) if predicate(&action) => return Ok(action),
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Action observer lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(StoreError::ChannelClosed);
                    },
                }
            }
        })
        .await
        .map_err(|_| StoreError::Timeout)?
    }

    /// Receive every action produced by this store's effects.
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
        self.action_broadcast.subscribe()
    }

    /// Read state through a closure so the lock is released promptly.
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        f(&state)
    }

    async fn dispatch(&self, action: A) -> EffectHandle {
        let effects = self.reduce(action).await;
        self.start_effects(effects)
    }

    async fn reduce(&self, action: A) -> SmallVec<[Effect<A>; 4]> {
        let mut state = self.state.write().await;
        let start = Instant::now();
        let effects = self.reducer.reduce(&mut state, action, &self.environment);
        StoreMetrics::record_action(start.elapsed());
        tracing::trace!(effects = effects.len(), "Reducer completed");
        effects
    }

    fn start_effects(&self, effects: SmallVec<[Effect<A>; 4]>) -> EffectHandle {
        let (handle, tracking) = EffectHandle::new();
        for effect in effects {
            self.execute_effect(effect, &tracking);
        }
        handle
    }

    /// Reduce an action produced by an effect, broadcast it, then start its effects.
    ///
    /// Observers see the action only once the state reflects it, and before any
    /// action its effects produce.
    async fn feed_back(&self, action: A) {
        let effects = self.reduce(action.clone()).await;
        let _ = self.action_broadcast.send(action);
        let _ = self.start_effects(effects);
    }

    /// Count an effect as started and return the guard that ends it.
    fn begin_effect(&self, tracking: &EffectTracking) -> EffectGuard {
        tracking.increment();
        self.pending_effects.fetch_add(1, Ordering::SeqCst);
        EffectGuard {
            tracking: tracking.clone(),
            pending: Arc::clone(&self.pending_effects),
        }
    }

    fn execute_effect(&self, effect: Effect<A>, tracking: &EffectTracking) {
        match effect {
            Effect::None => {
                StoreMetrics::record_effect("none");
            },
            Effect::Future(fut) => {
                StoreMetrics::record_effect("future");
                let guard = self.begin_effect(tracking);
                let store = self.clone();

                tokio::spawn(async move {
                    let _guard = guard;
                    if let Some(action) = fut.await {
                        store.feed_back(action).await;
                    }
                });
            },
            Effect::PublishEvent(operation) => {
                StoreMetrics::record_effect("publish_event");
                let guard = self.begin_effect(tracking);
                let store = self.clone();

                tokio::spawn(async move {
                    let _guard = guard;
                    if let Some(action) = store.publish(operation).await {
                        store.feed_back(action).await;
                    }
                });
            },
        }
    }

    async fn publish(&self, operation: EventBusOperation<A>) -> Option<A> {
        let EventBusOperation::Publish {
            event_bus,
            topic,
            event,
            on_success,
            on_error,
        } = operation;

        tracing::debug!(topic = %topic, event_type = %event.event_type, "Publishing event");
        let start = Instant::now();

        let result = retry_with_backoff(&self.retry_policy, "publish", || {
            let event_bus = Arc::clone(&event_bus);
            let topic = topic.clone();
            let event = event.clone();
            async move { event_bus.publish(&topic, &event).await }
        })
        .await;

        match result {
            Ok(()) => {
                EventBusMetrics::record_publish(&topic, start.elapsed());
                tracing::debug!(topic = %topic, "Publish succeeded");
                on_success(())
            },
            Err(RetryExhausted { error, attempts }) => {
                EventBusMetrics::record_publish_error(&topic);
                self.dlq.push(
                    FailedPublish {
                        topic: topic.clone(),
                        event,
                    },
                    error.to_string(),
                    attempts,
                );
                on_error(error)
            },
        }
    }
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            state: Arc::clone(&self.state),
            reducer: self.reducer.clone(),
            environment: self.environment.clone(),
            retry_policy: self.retry_policy.clone(),
            dlq: self.dlq.clone(),
            shutdown: Arc::clone(&self.shutdown),
            pending_effects: Arc::clone(&self.pending_effects),
            action_broadcast: self.action_broadcast.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/panic
mod tests {
    use super::*;
    use restbucks_core::{SmallVec, smallvec};

    #[derive(Debug, Clone, Default)]
    struct CupState {
        poured: u32,
    }

    #[derive(Debug, Clone)]
    enum CupAction {
        Pour,
        Poured,
        PourThree,
        Spill,
    }

    #[derive(Clone)]
    struct CupReducer;

    impl Reducer for CupReducer {
        type State = CupState;
        type Action = CupAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut CupState,
            action: CupAction,
            _env: &(),
        ) -> SmallVec<[Effect<CupAction>; 4]> {
            match action {
                CupAction::Pour => smallvec![Effect::Future(Box::pin(async {
                    Some(CupAction::Poured)
                }))],
                CupAction::Poured => {
                    state.poured += 1;
                    smallvec![Effect::None]
                },
                CupAction::PourThree => smallvec![
                    Effect::Future(Box::pin(async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Some(CupAction::Poured)
                    })),
                    Effect::Future(Box::pin(async { Some(CupAction::Poured) })),
                    Effect::Future(Box::pin(async { Some(CupAction::Poured) })),
                ],
                CupAction::Spill => smallvec![Effect::Future(Box::pin(async {
                    panic!("spilled");
                }))],
            }
        }
    }

    fn store() -> Store<CupState, CupAction, (), CupReducer> {
        Store::new(CupState::default(), CupReducer, ())
    }

    async fn eventually<F: Fn(&CupState) -> bool>(
        store: &Store<CupState, CupAction, (), CupReducer>,
        check: F,
    ) {
        for _ in 0..100 {
            if store.state(&check).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn future_feeds_back_its_action() {
        let store = store();
        let mut handle = store.send(CupAction::Pour).await.unwrap();
        handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.state(|s| s.poured).await, 1);
    }

    #[tokio::test]
    async fn every_returned_effect_runs() {
        let store = store();
        store.send(CupAction::PourThree).await.unwrap();

        eventually(&store, |s| s.poured == 3).await;
    }

    #[tokio::test]
    async fn broadcast_action_is_already_reduced() {
        let store = store();
        let mut actions = store.subscribe_actions();

        store.send(CupAction::Pour).await.unwrap();
        let observed = tokio::time::timeout(Duration::from_secs(1), actions.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(observed, CupAction::Poured));
        assert_eq!(store.state(|s| s.poured).await, 1);
    }

    #[tokio::test]
    async fn panicking_effect_releases_its_slot() {
        let store = store();
        let mut handle = store.send(CupAction::Spill).await.unwrap();
        handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.pending_effects(), 0);
        store.send(CupAction::Poured).await.unwrap();
        assert_eq!(store.state(|s| s.poured).await, 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_actions() {
        let store = store();
        store.shutdown(Duration::from_secs(1)).await.unwrap();

        assert!(matches!(
            store.send(CupAction::Pour).await,
            Err(StoreError::ShutdownInProgress)
        ));
        assert!(store.health().status.is_unhealthy());
    }

    #[tokio::test]
    async fn completed_handle_does_not_block() {
        let mut handle = EffectHandle::completed();
        assert_eq!(handle.pending(), 0);
        handle.wait_with_timeout(Duration::from_millis(10)).await.unwrap();
    }
}
