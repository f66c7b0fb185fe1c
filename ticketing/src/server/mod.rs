//! HTTP server module: state, health checks and routes.

pub mod health;
pub mod routes;
pub mod state;

pub use health::{AlwaysReady, ReadinessProbe, health_check};
pub use routes::build_router;
pub use state::AppState;
