//! Event-level endpoints.
//!
//! - PUT /api/events/:id - Register or update capacity (catalog hook)
//! - GET /api/events/:id/availability - Capacity figures
//! - POST /api/events/:id/queue/process - Run the offer issuer
//! - POST /api/events/:id/cancel - Refund every ticket, then cancel

use crate::server::state::AppState;
use admission_core::types::{EventId, EventInfo};
use admission_runtime::service::{Availability, CancellationReport};
use admission_web::AppError;
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

/// Catalog data the engine keeps per event.
#[derive(Debug, Deserialize)]
pub struct RegisterEventRequest {
    /// Sellable capacity
    pub total_tickets: u32,
    /// Ticket price in minor currency units
    pub price_cents: u64,
}

/// Result of a manual queue run.
#[derive(Debug, Serialize)]
pub struct ProcessQueueResponse {
    /// Event processed
    pub event_id: EventId,
    /// Offers issued by this run
    pub offers_issued: usize,
}

/// Register an event or update its capacity and price.
///
/// Capacity cannot change once a ticket is sold, nor drop below the offers
/// still live (409). Freed capacity is offered to the queue immediately.
///
/// ```bash
/// curl -X PUT http://localhost:8080/api/events/$EVENT \
///   -H 'content-type: application/json' \
///   -d '{"total_tickets": 100, "price_cents": 4500}'
/// ```
pub async fn register_event(
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
    Json(request): Json<RegisterEventRequest>,
) -> Result<Json<Availability>, AppError> {
    let event = EventInfo::new(event_id, request.total_tickets).with_price(request.price_cents);
    state.service.register_event(event).await?;
    Ok(Json(state.service.availability(event_id).await?))
}

/// Current capacity figures.
///
/// ```json
/// {
///   "event_id": "550e8400-e29b-41d4-a716-446655440000",
///   "total_tickets": 100,
///   "purchased": 97,
///   "active_offers": 3,
///   "available": 0,
///   "is_sold_out": true,
///   "cancelled": false
/// }
/// ```
pub async fn availability(
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
) -> Result<Json<Availability>, AppError> {
    Ok(Json(state.service.availability(event_id).await?))
}

/// Offer free spots to the head of the queue.
pub async fn process_queue(
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
) -> Result<Json<ProcessQueueResponse>, AppError> {
    let offers_issued = state.service.process_queue(event_id).await?;
    Ok(Json(ProcessQueueResponse {
        event_id,
        offers_issued,
    }))
}

/// Refund every sold ticket and cancel the event.
///
/// All or nothing: if any refund fails the event stays open and the response
/// is 502 listing the failed tickets. Re-running is safe.
pub async fn cancel_event(
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
) -> Result<Json<CancellationReport>, AppError> {
    Ok(Json(state.service.cancel_event(event_id).await?))
}
