//! Prometheus metrics for the admission engine.
//!
//! The recorder is installed once by the server; `render()` output is served
//! on the HTTP metrics route. Every fact the reducer emits is counted here so
//! operators can watch offers flow through the queue.

use admission_core::reducer::AdmissionEvent;
use admission_core::types::EventId;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and keeps its render handle.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Creates an uninstalled recorder
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Installs the global recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed (tests) is tolerated with a warning.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        describe_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(message))
                }
            }
        }
    }

    /// Prometheus text exposition, `None` until installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn describe_metrics() {
    describe_counter!("admission_joins_total", "Users who joined a waiting list");
    describe_counter!(
        "admission_joins_rate_limited_total",
        "Joins rejected by the per-user rate limit"
    );
    describe_counter!("admission_offers_issued_total", "Offers issued from the queue");
    describe_counter!("admission_offers_expired_total", "Offers that timed out");
    describe_counter!("admission_offers_released_total", "Offers given back early");
    describe_counter!(
        "admission_expirations_skipped_total",
        "Expiration jobs that fired for entries no longer offered"
    );
    describe_counter!(
        "admission_expirations_failed_total",
        "Expiration jobs whose handler failed and will be retried"
    );
    describe_counter!("admission_checkouts_started_total", "Checkout sessions opened");
    describe_counter!("admission_fulfillments_total", "Payments fulfilled into tickets");
    describe_counter!(
        "admission_fulfillments_duplicate_total",
        "Redelivered payment confirmations ignored"
    );
    describe_counter!(
        "admission_fulfillments_unmatched_total",
        "Payment confirmations without a matching payment"
    );
    describe_counter!(
        "admission_capacity_exceeded_total",
        "Late payments that pushed sales over capacity"
    );
    describe_counter!("admission_events_cancelled_total", "Events cancelled with refunds");
    describe_counter!(
        "admission_payments_voided_total",
        "Confirmations for cancelled checkouts, refunded instead of ticketed"
    );
    describe_counter!("admission_refunds_failed_total", "Refunds the gateway did not accept");
    describe_counter!("admission_gateway_retries_total", "Gateway calls retried");
    describe_histogram!(
        "admission_unit_of_work_duration_seconds",
        "Time an event lock was held"
    );
}

/// Counts one committed fact.
pub fn record_event(event_id: EventId, event: &AdmissionEvent) {
    match event {
        AdmissionEvent::Joined { .. } => counter!("admission_joins_total").increment(1),
        AdmissionEvent::OfferIssued { .. } => counter!("admission_offers_issued_total").increment(1),
        AdmissionEvent::OfferExpired { .. } => {
            counter!("admission_offers_expired_total").increment(1);
        }
        AdmissionEvent::OfferReleased { .. } => {
            counter!("admission_offers_released_total").increment(1);
        }
        AdmissionEvent::ExpirationSkipped { .. } => {
            counter!("admission_expirations_skipped_total").increment(1);
        }
        AdmissionEvent::CheckoutStarted { .. } => {
            counter!("admission_checkouts_started_total").increment(1);
        }
        AdmissionEvent::PaymentFulfilled { .. } => {
            counter!("admission_fulfillments_total").increment(1);
        }
        AdmissionEvent::FulfillmentSkipped { .. } => {
            counter!("admission_fulfillments_duplicate_total").increment(1);
        }
        AdmissionEvent::CapacityExceeded { available } => {
            tracing::warn!(%event_id, available, "Late payment oversold the event");
            counter!("admission_capacity_exceeded_total").increment(1);
        }
        AdmissionEvent::EventCancelled { .. } => {
            counter!("admission_events_cancelled_total").increment(1);
        }
        AdmissionEvent::PaymentVoided { .. } => {
            counter!("admission_payments_voided_total").increment(1);
        }
        AdmissionEvent::EventUpdated { total_tickets, .. } => {
            tracing::info!(%event_id, total_tickets, "Event capacity updated");
        }
        AdmissionEvent::SessionAttached { .. } | AdmissionEvent::EntryPurchased { .. } => {}
    }
}

/// Records how long a unit of work held its event.
pub fn record_unit_of_work(duration: Duration) {
    histogram!("admission_unit_of_work_duration_seconds").record(duration.as_secs_f64());
}
