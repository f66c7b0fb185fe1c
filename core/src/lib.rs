//! # Admission Core
//!
//! Core types and business rules for the waiting-list admission engine.
//!
//! The engine sells a fixed number of tickets per event under contention. Users
//! join a FIFO waiting list; whenever capacity frees up the oldest waiting
//! entries receive time-limited purchase offers. Offers either turn into a
//! ticket (payment fulfilled), time out, or are released, and every non-payment
//! outcome backfills from the queue.
//!
//! ## Architecture
//!
//! - **Functional core**: [`reducer::AdmissionReducer`] validates commands
//!   against an in-memory [`ledger::EventLedger`] and returns the facts it
//!   applied. No I/O happens inside the reducer.
//! - **Imperative shell**: the runtime crate opens an
//!   [`store::EventUnitOfWork`], feeds commands through the reducer, commits the
//!   tracked [`ledger::ChangeSet`] and talks to the [`gateway::PaymentGateway`]
//!   outside of any unit of work.
//! - **Dependency injection**: time, storage and the payment gateway are traits
//!   injected by the application's bootstrap.
//!
//! ## Invariant
//!
//! For every event at every observable instant:
//!
//! ```text
//! tickets(valid | used) + offers(offered, expires_at > now) <= total_tickets
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod capacity;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod offers;
pub mod position;
pub mod rate_limit;
pub mod reducer;
pub mod store;
pub mod types;

pub use error::{AdmissionError, AdmissionResult};

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected, so
/// tests can swap them for deterministic doubles.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Every deadline in the engine (offer expiry, rate-limit windows,
    /// scheduler wake-ups) is computed from this clock, never from
    /// `Utc::now()` directly.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
