//! # Admission Runtime
//!
//! The imperative shell of the admission engine.
//!
//! ## Core Components
//!
//! - **[`service::AdmissionService`]**: opens a unit of work per command, runs the
//!   admission reducer, commits, then schedules expirations and records metrics
//! - **[`scheduler::ExpirationScheduler`]**: fires persisted offer expirations
//!   at their deadline and recovers them after a restart
//! - **[`retry`]**: exponential backoff for payment gateway calls
//! - **[`rate_limit::FixedWindowRateLimiter`]**: per-user join limit
//! - **[`metrics::MetricsRecorder`]**: Prometheus exposition
//!
//! ## Example
//!
//! ```ignore
//! let (handle, inbox) = ExpirationScheduler::channel();
//! let service = Arc::new(AdmissionService::new(
//!     store.clone(),
//!     gateway,
//!     Arc::new(FixedWindowRateLimiter::new()),
//!     clock.clone(),
//!     handle,
//!     AdmissionConfig::default(),
//! ));
//! let scheduler = ExpirationScheduler::new(inbox, store, service.clone(), clock, sweep);
//! tokio::spawn(scheduler.run(shutdown_rx));
//!
//! let entry = service.join_queue(event_id, user_id).await?;
//! ```

/// Prometheus metrics for observability
pub mod metrics;

/// In-process join rate limiting
pub mod rate_limit;

/// Retry logic with exponential backoff
pub mod retry;

pub mod scheduler;

pub mod service;

pub use rate_limit::FixedWindowRateLimiter;
pub use scheduler::{ExpirationHandler, ExpirationScheduler, SchedulerHandle};
pub use service::{
    AdmissionConfig, AdmissionService, Availability, CancellationReport, ExpirationOutcome,
    FulfillmentOutcome,
};
