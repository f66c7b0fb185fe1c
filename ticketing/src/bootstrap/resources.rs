//! Infrastructure setup.
//!
//! [`ResourceManager`] owns every collaborator the admission service is wired
//! from. [`ResourceManager::from_config`] connects the real ones (Postgres store,
//! shared rate limiter, payment provider); [`ResourceManager::in_memory`] builds
//! the process-local set used by tests and local demos.

use crate::config::Config;
use crate::payment_gateway::build_gateway;
use crate::server::{AlwaysReady, ReadinessProbe};
use admission_core::environment::{Clock, SystemClock};
use admission_core::gateway::PaymentGateway;
use admission_core::rate_limit::JoinRateLimiter;
use admission_core::store::{AdmissionStore, SellerAccounts};
use admission_postgres::{PostgresAdmissionStore, PostgresRateLimiter};
use admission_runtime::rate_limit::FixedWindowRateLimiter;
use admission_testing::InMemoryAdmissionStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Collaborators injected into the admission service.
///
/// All resources are behind `Arc` and shared with the scheduler task.
#[derive(Clone)]
pub struct ResourceManager {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Admission state
    pub store: Arc<dyn AdmissionStore>,
    /// Seller capability flags
    pub sellers: Arc<dyn SellerAccounts>,
    /// Join limiter
    pub rate_limiter: Arc<dyn JoinRateLimiter>,
    /// Payment provider
    pub payment_gateway: Arc<dyn PaymentGateway>,
    /// What `/ready` checks
    pub readiness: Arc<dyn ReadinessProbe>,
}

impl ResourceManager {
    /// Connects the database, runs migrations and builds the provider client.
    ///
    /// # Errors
    ///
    /// Returns error if the database is unreachable, a migration fails or the
    /// HTTP client cannot be built.
    pub async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Connecting to admission database...");
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .min_connections(config.postgres.min_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .idle_timeout(Duration::from_secs(config.postgres.idle_timeout))
            .connect(&config.postgres.url)
            .await?;

        let store = Arc::new(PostgresAdmissionStore::from_pool(pool.clone()));
        info!("Running admission migrations...");
        store.migrate().await?;
        info!("Admission database ready");

        let payment_gateway = build_gateway(&config.gateway)?;

        Ok(Self {
            clock: Arc::new(SystemClock),
            store: store.clone(),
            sellers: store.clone(),
            rate_limiter: Arc::new(PostgresRateLimiter::new(pool)),
            payment_gateway,
            readiness: store,
        })
    }

    /// Process-local resources: in-memory store and limiter.
    #[must_use]
    pub fn in_memory(payment_gateway: Arc<dyn PaymentGateway>, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(InMemoryAdmissionStore::new());
        Self {
            clock,
            store: store.clone(),
            sellers: store,
            rate_limiter: Arc::new(FixedWindowRateLimiter::new()),
            payment_gateway,
            readiness: Arc::new(AlwaysReady),
        }
    }
}
