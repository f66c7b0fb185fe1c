//! Payment provider client.
//!
//! [`HttpPaymentGateway`] talks to a Stripe-compatible REST API (form-encoded
//! requests, bearer secret key, `Idempotency-Key` header). Without a configured
//! provider the bootstrap falls back to the in-memory mock, which opens
//! sessions but never confirms them on its own.

use crate::config::GatewayConfig;
use admission_core::gateway::{
    CheckoutSession, CheckoutSessionRequest, GatewayError, GatewayFuture, GatewayResult,
    PaymentGateway, RefundRequest,
};
use admission_core::types::SessionRef;
use admission_testing::MockPaymentGateway;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Builds the gateway selected by configuration.
///
/// # Errors
///
/// Returns error if the HTTP client cannot be constructed.
pub fn build_gateway(config: &GatewayConfig) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
    match (&config.url, &config.secret_key) {
        (Some(url), Some(secret_key)) => {
            tracing::info!(url = %url, "Using HTTP payment gateway");
            Ok(Arc::new(HttpPaymentGateway::new(
                url.clone(),
                secret_key.clone(),
                config.currency.clone(),
                Duration::from_millis(config.timeout_ms),
            )?))
        }
        _ => {
            tracing::warn!("PAYMENT_GATEWAY_URL not set, using the mock payment gateway");
            Ok(Arc::new(MockPaymentGateway::new()))
        }
    }
}

/// Stripe-compatible HTTP client.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    secret_key: String,
    currency: String,
}

impl std::fmt::Debug for HttpPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentGateway")
            .field("base_url", &self.base_url)
            .field("currency", &self.currency)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    id: String,
    url: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

impl HttpPaymentGateway {
    /// Creates a client for `base_url` (for example `https://api.stripe.com`).
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(
        base_url: String,
        secret_key: String,
        currency: String,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            secret_key,
            currency,
        })
    }

    /// Form fields of a checkout-session request.
    fn checkout_form(&self, request: &CheckoutSessionRequest) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("mode", "payment".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", self.currency.clone()),
            (
                "line_items[0][price_data][unit_amount]",
                request.amount_cents.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                "Event ticket".to_string(),
            ),
            ("expires_at", request.expires_at.timestamp().to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("client_reference_id", request.payment_id.to_string()),
            ("metadata[event_id]", request.metadata.event_id.to_string()),
            ("metadata[user_id]", request.metadata.user_id.to_string()),
        ];
        if let Some(entry_id) = request.metadata.waiting_list_entry_id {
            form.push(("metadata[waiting_list_entry_id]", entry_id.to_string()));
        }
        form
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.secret_key)
    }
}

/// Maps a transport failure onto the retry classification.
fn transport_error(error: &reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable(error.to_string())
    }
}

/// Maps a non-success status onto the retry classification.
fn status_error(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error.message)
        .unwrap_or_else(|| status.to_string());

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        GatewayError::Unavailable(message)
    } else if status == StatusCode::REQUEST_TIMEOUT {
        GatewayError::Timeout
    } else {
        GatewayError::Rejected(message)
    }
}

async fn send_json<T: for<'de> Deserialize<'de>>(builder: RequestBuilder) -> GatewayResult<T> {
    let response = builder.send().await.map_err(|e| transport_error(&e))?;
    let status = response.status();
    let body = response.text().await.map_err(|e| transport_error(&e))?;

    if !status.is_success() {
        return Err(status_error(status, &body));
    }

    serde_json::from_str(&body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

impl PaymentGateway for HttpPaymentGateway {
    fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> GatewayFuture<CheckoutSession> {
        let builder = self
            .authorized(
                self.client
                    .post(format!("{}/v1/checkout/sessions", self.base_url)),
            )
            .header("Idempotency-Key", format!("checkout-{}", request.payment_id))
            .form(&self.checkout_form(&request));

        Box::pin(async move {
            let body: SessionBody = send_json(builder).await?;
            let url = body.url.ok_or_else(|| {
                GatewayError::InvalidResponse("checkout session without url".to_string())
            })?;
            Ok(CheckoutSession {
                session_ref: SessionRef::new(body.id),
                url,
            })
        })
    }

    fn retrieve_payment_intent(&self, session_ref: &SessionRef) -> GatewayFuture<String> {
        let builder = self.authorized(self.client.get(format!(
            "{}/v1/checkout/sessions/{}",
            self.base_url,
            session_ref.as_str()
        )));

        Box::pin(async move {
            let body: SessionBody = send_json(builder).await?;
            body.payment_intent.ok_or_else(|| {
                GatewayError::Rejected(format!("session {} has no payment intent", body.id))
            })
        })
    }

    fn refund(&self, request: RefundRequest) -> GatewayFuture<String> {
        let builder = self
            .authorized(self.client.post(format!("{}/v1/refunds", self.base_url)))
            .header("Idempotency-Key", request.idempotency_key.clone())
            .form(&[("payment_intent", request.payment_intent.as_str())]);

        Box::pin(async move {
            let body: RefundBody = send_json(builder).await?;
            Ok(body.id)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use admission_core::gateway::CheckoutMetadata;
    use admission_core::types::{EntryId, EventId, PaymentId, UserId};
    use chrono::TimeZone;

    fn gateway() -> HttpPaymentGateway {
        HttpPaymentGateway::new(
            "http://127.0.0.1:9".to_string(),
            "sk_test".to_string(),
            "eur".to_string(),
            Duration::from_millis(200),
        )
        .unwrap()
    }

    #[test]
    fn checkout_form_carries_metadata_and_expiry() {
        let entry_id = EntryId::new();
        let request = CheckoutSessionRequest {
            payment_id: PaymentId::new(),
            amount_cents: 4500,
            expires_at: chrono::Utc.timestamp_opt(1_735_691_400, 0).unwrap(),
            metadata: CheckoutMetadata {
                event_id: EventId::new(),
                user_id: UserId::new(),
                waiting_list_entry_id: Some(entry_id),
            },
            success_url: "https://x/ok".to_string(),
            cancel_url: "https://x/cancel".to_string(),
        };

        let form = gateway().checkout_form(&request);
        let field = |name: &str| {
            form.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(field("expires_at"), "1735691400");
        assert_eq!(field("line_items[0][price_data][unit_amount]"), "4500");
        assert_eq!(field("line_items[0][price_data][currency]"), "eur");
        assert_eq!(field("metadata[waiting_list_entry_id]"), entry_id.to_string());
        assert_eq!(field("client_reference_id"), request.payment_id.to_string());
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(!status_error(StatusCode::BAD_REQUEST, "").is_transient());
    }

    #[test]
    fn provider_message_is_kept() {
        let body = r#"{"error":{"message":"No such checkout session","type":"invalid_request_error"}}"#;
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, body),
            GatewayError::Rejected("No such checkout session".to_string())
        );
    }

    #[tokio::test]
    async fn unreachable_provider_is_unavailable() {
        let err = gateway().refund(RefundRequest {
            payment_intent: "pi_1".to_string(),
            idempotency_key: "refund-1".to_string(),
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
    }
}
