//! # Admission Testing
//!
//! Testing utilities for the admission engine.
//!
//! This crate provides:
//! - A controllable [`TestClock`] and a [`FixedClock`]
//! - [`InMemoryAdmissionStore`]: per-event mutex store with commit failure injection
//! - [`MockPaymentGateway`]: recording gateway with failure injection
//! - [`ReducerTest`]: Given-When-Then harness for the reducer
//! - [`TestHarness`]: a fully wired service driven by the test clock
//!
//! ## Example
//!
//! ```ignore
//! use admission_testing::TestHarness;
//!
//! #[tokio::test]
//! async fn single_spot_is_offered() {
//!     let mut harness = TestHarness::new();
//!     let event_id = harness.event(1).await;
//!
//!     let entry = harness.service.join_queue(event_id, UserId::new()).await.unwrap();
//!     assert_eq!(entry.status, WaitingListStatus::Offered);
//! }
//! ```

use admission_core::environment::Clock;
use chrono::{DateTime, Utc};

pub mod fixtures;
pub mod gateway;
pub mod harness;
pub mod store;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use admission_testing::mocks::FixedClock;
    /// use admission_core::environment::Clock;
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

    /// Clock that only moves when a test advances it.
    ///
    /// # Example
    ///
    /// ```
    /// use admission_testing::mocks::TestClock;
    /// use admission_core::environment::Clock;
    ///
    /// let clock = TestClock::default();
    /// let start = clock.now();
    /// clock.advance(chrono::Duration::minutes(30));
    /// assert_eq!(clock.now() - start, chrono::Duration::minutes(30));
    /// ```
    #[derive(Debug)]
    pub struct TestClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl TestClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Moves time forward.
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut time) = self.time.lock() {
                *time += by;
            }
        }

        /// Jumps to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            if let Ok(mut time) = self.time.lock() {
                *time = to;
            }
        }
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new(epoch())
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            self.time.lock().map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(epoch())
    }
}

pub use gateway::MockPaymentGateway;
pub use harness::TestHarness;
pub use mocks::{FixedClock, TestClock, test_clock};
pub use reducer_test::ReducerTest;
pub use store::InMemoryAdmissionStore;
