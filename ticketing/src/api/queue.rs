//! Waiting-list endpoints. All require an authenticated caller.

use crate::server::state::AppState;
use admission_core::types::{EntryId, EventId, QueuePosition, WaitingListEntry};
use admission_web::{AppError, AuthenticatedUser};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// Join the waiting list. A free spot is offered right away.
///
/// 409 when the caller already holds a live entry, 429 when they joined too
/// often recently.
pub async fn join_queue(
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<(StatusCode, Json<WaitingListEntry>), AppError> {
    let entry = state.service.join_queue(event_id, user.user_id).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// The caller's entry and 1-based rank.
pub async fn queue_position(
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<QueuePosition>, AppError> {
    state
        .service
        .queue_position(event_id, user.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Not in the waiting list for this event"))
}

/// Give an offer back so the next user gets it.
pub async fn release_offer(
    Path((event_id, entry_id)): Path<(EventId, EntryId)>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<StatusCode, AppError> {
    state
        .service
        .release_offer(event_id, entry_id, user.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
