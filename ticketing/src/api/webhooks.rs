//! POST /api/webhooks/payments - signed provider notifications.
//!
//! Status codes drive the provider's redelivery:
//! - 400 for a bad signature or body (the provider retries, then gives up)
//! - 500 when applying the notification failed (redelivered; fulfill is idempotent)
//! - 200 otherwise, including for event types the engine does not handle

use crate::metrics::{record_signature_failure, record_webhook};
use crate::server::state::AppState;
use crate::webhook::{Notification, SIGNATURE_HEADER};
use admission_runtime::service::FulfillmentOutcome;
use admission_web::AppError;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde::Serialize;

/// Acknowledgement body.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Always `true`
    pub received: bool,
    /// Fulfillment result for checkout completions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfillment: Option<FulfillmentOutcome>,
}

/// Verify, parse and apply one notification.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(error) = state.webhooks.verify(signature, &body, state.clock.now()) {
        tracing::warn!(%error, "Payment notification refused");
        record_signature_failure(&error);
        return Err(AppError::bad_request(format!("Webhook error: {error}")));
    }

    let notification = Notification::parse(&body).map_err(|error| {
        tracing::warn!(%error, "Malformed payment notification");
        AppError::bad_request(format!("Malformed notification: {error}"))
    })?;
    let kind = notification.kind().to_owned();

    match notification {
        Notification::CheckoutCompleted {
            session_ref,
            payment_intent,
            metadata,
        } => {
            tracing::info!(
                session_ref = %session_ref,
                event_id = metadata.event_id.as_deref().unwrap_or("-"),
                user_id = metadata.user_id.as_deref().unwrap_or("-"),
                entry_id = metadata.waiting_list_entry_id.as_deref().unwrap_or("-"),
                "Checkout completed"
            );

            match state.service.fulfill(&session_ref, payment_intent).await {
                Ok(outcome) => {
                    record_webhook(&kind, "applied");
                    Ok(Json(WebhookAck {
                        received: true,
                        fulfillment: Some(outcome),
                    }))
                }
                Err(error) => {
                    record_webhook(&kind, "failed");
                    Err(AppError::internal("Failed to apply payment confirmation")
                        .with_source(anyhow::Error::new(error)))
                }
            }
        }
        Notification::AccountUpdated {
            account_id,
            charges_enabled,
        } => {
            if let Err(error) = state
                .sellers
                .set_charges_enabled(&account_id, charges_enabled)
                .await
            {
                record_webhook(&kind, "failed");
                return Err(AppError::internal("Failed to update seller account")
                    .with_source(anyhow::Error::new(error)));
            }
            tracing::info!(account_id = %account_id, charges_enabled, "Seller account updated");
            record_webhook(&kind, "applied");
            Ok(Json(WebhookAck {
                received: true,
                fulfillment: None,
            }))
        }
        Notification::Other(_) => {
            tracing::debug!(kind = %kind, "Ignoring payment notification");
            record_webhook(&kind, "ignored");
            Ok(Json(WebhookAck {
                received: true,
                fulfillment: None,
            }))
        }
    }
}
