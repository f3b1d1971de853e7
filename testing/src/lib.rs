//! # Restbucks Testing
//!
//! Test support shared by the Restbucks crates:
//! - [`mocks::FixedClock`] and [`test_clock`] for deterministic time
//! - [`mocks::InMemoryEventBus`] and [`mocks::FailingEventBus`]
//! - [`ReducerTest`], a Given/When/Then harness, and effect [`assertions`]
//! - [`init_test_tracing`] to see log output from failing tests
//!
//! ## Example
//!
//! ```ignore
//! use restbucks_testing::{ReducerTest, assertions, test_clock};
//!
//! ReducerTest::new(PaymentReducer)
//!     .with_env(env)
//!     .given_state(PaymentState::default())
//!     .when_action(PaymentAction::PayOrder { order_id, card })
//!     .then_effects(assertions::assert_has_future_effect)
//!     .run();
//! ```

use chrono::{DateTime, Utc};
use restbucks_core::environment::Clock;

mod event_bus;
pub mod reducer_test;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    pub use crate::event_bus::{FailingEventBus, InMemoryEventBus};

    /// Clock that always returns the same instant.
    ///
    /// ```
    /// use restbucks_testing::mocks::FixedClock;
    /// use restbucks_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Fixed clock at 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::default() + chrono::Duration::days(20_089))
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything. The filter
/// comes from `RUST_LOG` and defaults to `debug`.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

pub use mocks::{FixedClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_new_year_2025() {
        let clock = test_clock();
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn tracing_can_be_initialised_twice() {
        init_test_tracing();
        init_test_tracing();
    }
}
