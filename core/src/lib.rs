//! # Restbucks Core
//!
//! Core traits and types shared by every Restbucks crate.
//!
//! The ordering service is built from small reducers driven by a runtime `Store`:
//!
//! - **State**: Domain state owned by one store
//! - **Action**: All inputs to a reducer (commands, results of effects, bus events)
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Descriptions of side effects, executed by the runtime
//! - **Environment**: Injected dependencies (clock, repositories, event bus)
//!
//! Effects are values. A reducer never touches the repository or the event bus
//! directly; it returns an [`effect::Effect`] describing the work and the runtime
//! feeds the resulting action back into the reducer.
//!
//! ## Example
//!
//! ```ignore
//! use restbucks_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
//!
//! impl Reducer for ProcessorReducer {
//!     type State = ProcessorState;
//!     type Action = ProcessorAction;
//!     type Environment = ProcessorEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut ProcessorState,
//!         action: ProcessorAction,
//!         env: &ProcessorEnvironment,
//!     ) -> SmallVec<[Effect<ProcessorAction>; 4]> {
//!         smallvec![Effect::None]
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod event;
pub mod event_bus;

mod effect_macros;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all business logic and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// Most actions produce zero or one effect, so the result is a
        /// `SmallVec` that stays on the stack in the common case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values, not execution.
pub mod effect {
    use crate::event::SerializedEvent;
    use crate::event_bus::{EventBus, EventBusError};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;

    /// Callback invoked with the outcome of an effect operation.
    pub type Callback<T, Action> = Box<dyn FnOnce(T) -> Option<Action> + Send>;

    /// Event bus operations that can be described as effects
    pub enum EventBusOperation<Action> {
        /// Publish a serialized event to a topic
        Publish {
            /// Bus to publish on
            event_bus: Arc<dyn EventBus>,
            /// Destination topic
            topic: String,
            /// Event payload
            event: SerializedEvent,
            /// Action to feed back once the event is published
            on_success: Callback<(), Action>,
            /// Action to feed back if publishing failed after all retries
            on_error: Callback<EventBusError, Action>,
        },
    }

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the Store runtime.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

        /// Publish an event to the event bus (retried by the runtime)
        PublishEvent(EventBusOperation<Action>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
                Effect::PublishEvent(EventBusOperation::Publish { topic, event, .. }) => f
                    .debug_struct("Effect::PublishEvent")
                    .field("topic", topic)
                    .field("event_type", &event.event_type)
                    .finish_non_exhaustive(),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Returns `true` for `Effect::None`
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
