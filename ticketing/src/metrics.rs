//! HTTP-edge metrics for the ticketing server.
//!
//! Engine metrics (offers, expirations, fulfillments) are recorded by the
//! admission runtime. This module adds what only the edge can see.
//!
//! ## Counters
//! - `ticketing_webhooks_total{type,outcome}` - Payment notifications by result
//! - `ticketing_webhook_signature_failures_total{reason}` - Refused deliveries

use crate::webhook::SignatureError;
use metrics::describe_counter;

/// Registers metric descriptions. Call once after the recorder is installed.
pub fn register_edge_metrics() {
    describe_counter!(
        "ticketing_webhooks_total",
        "Payment notifications processed, by type and outcome"
    );
    describe_counter!(
        "ticketing_webhook_signature_failures_total",
        "Payment notifications refused before parsing"
    );
}

/// Record one processed notification.
pub fn record_webhook(kind: &str, outcome: &'static str) {
    metrics::counter!(
        "ticketing_webhooks_total",
        "type" => kind.to_owned(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a refused delivery.
pub fn record_signature_failure(error: &SignatureError) {
    let reason = match error {
        SignatureError::NotConfigured => "not_configured",
        SignatureError::MissingHeader => "missing_header",
        SignatureError::Malformed => "malformed",
        SignatureError::Expired => "expired",
        SignatureError::Mismatch => "mismatch",
    };
    metrics::counter!("ticketing_webhook_signature_failures_total", "reason" => reason).increment(1);
}
