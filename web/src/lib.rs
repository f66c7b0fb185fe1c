//! Axum integration for the admission engine.
//!
//! The HTTP layer is the imperative shell's outermost ring: it authenticates
//! the caller, hands typed inputs to `AdmissionService` and maps the result.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         HTTP (Axum)                     │  ← identity, JSON, status codes
//! ├─────────────────────────────────────────┤
//! │         AdmissionService                │  ← units of work, gateway calls
//! ├─────────────────────────────────────────┤
//! │         AdmissionReducer                │  ← pure admission rules
//! └─────────────────────────────────────────┘
//! ```
//!
//! - [`AppError`] turns `AdmissionError` into a status code and JSON body.
//! - [`AuthenticatedUser`] resolves the bearer credential through an
//!   [`IdentityVerifier`] before a handler touches any state.
//! - [`correlation_id`] middleware tags every request span with a correlation ID.

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod middleware;

pub use error::AppError;
pub use extractors::{
    AuthenticatedUser, BearerToken, CorrelationId, IdentityFuture, IdentityVerifier,
    StaticTokenVerifier,
};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
