//! Router configuration for the ticketing server.

use super::health::{health_check, readiness_check};
use super::state::AppState;
use crate::api;
use admission_web::correlation_id;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// Health checks and metrics sit at the root; everything else is under
/// `/api`. Routes marked (auth) in the handler docs reject unauthenticated
/// callers with 401 before any state is read.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Events (catalog hook, availability, operator actions)
        .route("/events/:id", put(api::register_event))
        .route("/events/:id/availability", get(api::availability))
        .route("/events/:id/queue/process", post(api::process_queue))
        .route("/events/:id/cancel", post(api::cancel_event))
        // Waiting list
        .route("/events/:id/queue", post(api::join_queue))
        .route("/events/:id/queue/position", get(api::queue_position))
        .route(
            "/events/:id/offers/:entry_id/release",
            post(api::release_offer),
        )
        // Checkout and tickets
        .route("/events/:id/checkout", post(api::begin_checkout))
        .route("/events/:id/ticket", get(api::user_ticket))
        .route("/payments/:id/ticket", get(api::payment_ticket))
        .route("/checkout/sessions/:session_id", get(api::session_status))
        // Provider notifications
        .route("/webhooks/payments", post(api::payment_webhook));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(correlation_id))
        .with_state(state)
}

/// Prometheus exposition; 404 when metrics are disabled.
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.as_ref().and_then(|recorder| recorder.render()) {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
