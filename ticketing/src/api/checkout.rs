//! Checkout and ticket lookup endpoints. All require an authenticated caller.

use crate::server::state::AppState;
use admission_core::gateway::CheckoutSession;
use admission_core::types::{EventId, PaymentId, PaymentStatus, SessionRef, Ticket};
use admission_web::{AppError, AuthenticatedUser};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

/// State of a checkout as seen from the purchase-success page.
#[derive(Debug, Serialize)]
pub struct CheckoutStatusResponse {
    /// Local payment record
    pub payment_id: PaymentId,
    /// Payment status
    pub status: PaymentStatus,
    /// Ticket, once the provider confirmed the payment
    pub ticket: Option<Ticket>,
}

/// Open a hosted checkout for the caller's offer.
///
/// 409 without a live offer, 502 when the provider fails after retries.
pub async fn begin_checkout(
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<CheckoutSession>, AppError> {
    Ok(Json(
        state.service.begin_checkout(event_id, user.user_id).await?,
    ))
}

/// The caller's ticket for an event.
pub async fn user_ticket(
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Ticket>, AppError> {
    state
        .service
        .user_ticket(event_id, user.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("No ticket for this event"))
}

/// The ticket issued for one of the caller's payments.
pub async fn payment_ticket(
    Path(payment_id): Path<PaymentId>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Ticket>, AppError> {
    // Someone else's ticket is reported as missing
    state
        .service
        .ticket_for_payment(payment_id)
        .await?
        .filter(|ticket| ticket.user_id == user.user_id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("No ticket for payment {payment_id}")))
}

/// Payment status and ticket for a checkout session.
///
/// The ticket is `null` until the provider's notification arrives, so the
/// success page polls this.
pub async fn session_status(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<CheckoutStatusResponse>, AppError> {
    let session_ref = SessionRef::new(session_id);
    let (payment, ticket) = state.service.ticket_for_session(&session_ref).await?;
    if payment.user_id != user.user_id {
        return Err(AppError::not_found(format!(
            "checkout session not found: {session_ref}"
        )));
    }

    Ok(Json(CheckoutStatusResponse {
        payment_id: payment.id,
        status: payment.status,
        ticket,
    }))
}
