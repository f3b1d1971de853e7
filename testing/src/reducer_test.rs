//! Given/When/Then harness for reducers, plus effect assertions.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use restbucks_core::{effect::Effect, reducer::Reducer};

type StateAssertion<S> = Box<dyn FnOnce(&S)>;
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Fluent reducer test.
///
/// Actions given with [`given_actions`](Self::given_actions) are reduced first and
/// their effects discarded; effect assertions only see the effects of the action
/// under test.
///
/// ```ignore
/// ReducerTest::new(ProcessorReducer)
///     .with_env(env)
///     .given_state(ProcessorState::default())
///     .when_action(ProcessorAction::OrderPaid { order_id })
///     .then_state(|state| assert!(state.in_flight.contains(&order_id)))
///     .then_effects(assertions::assert_has_future_effect)
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    history: Vec<A>,
    action: Option<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion<A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Start a test for `reducer`.
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            history: Vec::new(),
            action: None,
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Set the environment.
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given).
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Actions already applied before the one under test (Given).
    #[must_use]
    pub fn given_actions(mut self, actions: impl IntoIterator<Item = A>) -> Self {
        self.history.extend(actions);
        self
    }

    /// The action under test (When).
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.action = Some(action);
        self
    }

    /// Assert on the resulting state (Then).
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Assert on the effects of the action under test (Then).
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Run the reducer and every assertion.
    ///
    /// # Panics
    ///
    /// Panics if state, action or environment were not set, or if an assertion fails.
    #[allow(clippy::expect_used)] // Test harness
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");
        let action = self.action.expect("Action must be set with when_action()");
        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        for earlier in self.history {
            let _ = self.reducer.reduce(&mut state, earlier, &env);
        }

        let effects = self.reducer.reduce(&mut state, action, &env);

        for assertion in self.state_assertions {
            assertion(&state);
        }
        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use restbucks_core::effect::{Effect, EventBusOperation};

    /// Assert that there are no effects (an empty list or a single `Effect::None`).
    ///
    /// # Panics
    ///
    /// Panics if a real effect is present.
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(Effect::is_none),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the count differs.
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {expected} effects, but found {}",
            effects.len()
        );
    }

    /// Assert that at least one `Effect::Future` is present.
    ///
    /// # Panics
    ///
    /// Panics if none is found.
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "Expected at least one Future effect, but none found"
        );
    }

    /// Assert that at least one `PublishEvent` effect is present.
    ///
    /// # Panics
    ///
    /// Panics if none is found.
    pub fn assert_has_publish_event_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::PublishEvent(_))),
            "Expected at least one PublishEvent effect, but none found"
        );
    }

    /// Assert that an event of `event_type` is published to `topic`.
    ///
    /// # Panics
    ///
    /// Panics if no matching `PublishEvent` effect is found.
    pub fn assert_publishes<A>(effects: &[Effect<A>], topic: &str, event_type: &str) {
        let found = effects.iter().any(|e| {
            matches!(
                e,
                Effect::PublishEvent(EventBusOperation::Publish { topic: t, event, .. })
                    if t == topic && event.event_type == event_type
            )
        });
        assert!(found, "Expected {event_type} to be published to '{topic}'");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restbucks_core::{SmallVec, smallvec};

    #[derive(Clone, Debug, Default)]
    struct TillState {
        cups: i32,
    }

    #[derive(Clone, Debug)]
    enum TillAction {
        Sell,
        Refund,
        Remind,
    }

    struct TillReducer;

    impl Reducer for TillReducer {
        type State = TillState;
        type Action = TillAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut TillState,
            action: TillAction,
            _env: &(),
        ) -> SmallVec<[Effect<TillAction>; 4]> {
            match action {
                TillAction::Sell => {
                    state.cups += 1;
                    smallvec![Effect::None]
                },
                TillAction::Refund => {
                    state.cups -= 1;
                    smallvec![Effect::None]
                },
                TillAction::Remind => smallvec![Effect::Future(Box::pin(async { Some(TillAction::Sell) }))],
            }
        }
    }

    #[test]
    fn given_actions_are_applied_first() {
        ReducerTest::new(TillReducer)
            .with_env(())
            .given_state(TillState::default())
            .given_actions([TillAction::Sell, TillAction::Sell])
            .when_action(TillAction::Refund)
            .then_state(|state| assert_eq!(state.cups, 1))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn effect_assertions_see_the_action_under_test() {
        ReducerTest::new(TillReducer)
            .with_env(())
            .given_state(TillState::default())
            .when_action(TillAction::Remind)
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    #[should_panic(expected = "Expected at least one Future effect")]
    fn missing_future_effect_fails() {
        assertions::assert_has_future_effect::<TillAction>(&[Effect::None]);
    }
}
