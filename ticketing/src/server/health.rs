//! Health check endpoints for the ticketing server.

use super::state::AppState;
use admission_postgres::PostgresAdmissionStore;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

/// Boxed readiness result
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// A dependency the server needs before taking traffic.
pub trait ReadinessProbe: Send + Sync {
    /// Short component name reported by `/ready`
    fn name(&self) -> &'static str;

    /// Resolves to `Err` with a reason when the dependency is unusable.
    fn check(&self) -> ProbeFuture<'_>;
}

impl ReadinessProbe for PostgresAdmissionStore {
    fn name(&self) -> &'static str {
        "database"
    }

    fn check(&self) -> ProbeFuture<'_> {
        Box::pin(async move { self.ping().await.map_err(|e| e.to_string()) })
    }
}

/// Probe for in-process dependencies that are always up.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl ReadinessProbe for AlwaysReady {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    fn check(&self) -> ProbeFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
}

/// Liveness: the process is up. Does not touch dependencies.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"ok","version":"0.1.0"}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,
    /// Probed component
    pub component: &'static str,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness: 200 when the store answers, 503 otherwise.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let readiness = &state.readiness;
    match readiness.check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                ready: true,
                component: readiness.name(),
                error: None,
            }),
        ),
        Err(error) => {
            tracing::warn!(component = readiness.name(), %error, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    ready: false,
                    component: readiness.name(),
                    error: Some(error),
                }),
            )
        }
    }
}
