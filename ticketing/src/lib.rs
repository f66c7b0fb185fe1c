//! Waiting-list ticketing server.
//!
//! The HTTP edge of the admission engine: it authenticates buyers, forwards
//! their requests to [`admission_runtime::service::AdmissionService`], verifies
//! payment-provider notifications and runs the offer expiration scheduler
//! next to the server.
//!
//! # Architecture
//!
//! ```text
//!  buyers ──► /api/events/:id/queue ─┐
//!             /api/events/:id/checkout├─► AdmissionService ──► AdmissionStore
//!  provider ─► /api/webhooks/payments┘         │                (Postgres)
//!                                              ▼
//!                                     ExpirationScheduler
//! ```
//!
//! Everything the service needs is injected by [`bootstrap::wire`]; the same
//! wiring runs against Postgres in production and against in-memory doubles
//! in the integration tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod metrics;
pub mod payment_gateway;
pub mod runtime;
pub mod server;
pub mod webhook;

pub use bootstrap::{ApplicationBuilder, ResourceManager};
pub use config::Config;
pub use runtime::Application;
