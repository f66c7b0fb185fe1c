//! `PostgreSQL` store for the admission engine.
//!
//! This crate implements the [`AdmissionStore`](admission_core::store::AdmissionStore)
//! trait from `admission-core` on sqlx. It provides:
//!
//! - Event-scoped units of work: a transaction holding `SELECT ... FOR UPDATE`
//!   on the event row
//! - The persisted offer-expiration job table read by the scheduler
//! - A shared join rate limiter for multi-instance deployments
//! - Seller capability flags
//!
//! # Example
//!
//! ```ignore
//! use admission_postgres::PostgresAdmissionStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresAdmissionStore::connect("postgres://localhost/admission", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

mod rows;

/// Shared fixed-window join limiter
pub mod rate_limit;

/// Store and unit of work
pub mod store;

pub use rate_limit::PostgresRateLimiter;
pub use store::PostgresAdmissionStore;

use admission_core::error::AdmissionError;

#[allow(clippy::needless_pass_by_value)] // Used as `map_err(storage)`
fn storage(error: sqlx::Error) -> AdmissionError {
    AdmissionError::Storage(error.to_string())
}
