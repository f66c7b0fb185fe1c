//! Application state for the ticketing HTTP server.

use crate::server::health::ReadinessProbe;
use crate::webhook::WebhookVerifier;
use admission_core::environment::Clock;
use admission_core::store::SellerAccounts;
use admission_runtime::metrics::MetricsRecorder;
use admission_runtime::service::AdmissionService;
use admission_web::IdentityVerifier;
use axum::extract::FromRef;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The admission engine
    pub service: Arc<AdmissionService>,

    /// Seller capability side channel fed by `account.updated`
    pub sellers: Arc<dyn SellerAccounts>,

    /// Resolves bearer credentials to users
    pub identity: Arc<dyn IdentityVerifier>,

    /// Checks provider signatures on inbound notifications
    pub webhooks: Arc<WebhookVerifier>,

    /// Time source for signature tolerance
    pub clock: Arc<dyn Clock>,

    /// Dependency checks behind `/ready`
    pub readiness: Arc<dyn ReadinessProbe>,

    /// Prometheus exposition, when metrics are enabled
    pub metrics: Option<Arc<MetricsRecorder>>,
}

impl FromRef<AppState> for Arc<dyn IdentityVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.identity.clone()
    }
}
