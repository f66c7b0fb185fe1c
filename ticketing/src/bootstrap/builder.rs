//! Declarative application builder.
//!
//! ```rust,ignore
//! ApplicationBuilder::new()
//!     .with_config(Config::from_env()?)
//!     .with_tracing()?
//!     .with_metrics()?
//!     .with_resources().await?
//!     .build().await?
//!     .run().await?;
//! ```
//!
//! Each step returns `Result` so a failed start names the step that failed.

use crate::bootstrap::ResourceManager;
use crate::config::Config;
use crate::metrics::register_edge_metrics;
use crate::runtime::Application;
use crate::server::{AppState, build_router};
use crate::webhook::WebhookVerifier;
use admission_runtime::metrics::MetricsRecorder;
use admission_runtime::scheduler::ExpirationScheduler;
use admission_runtime::service::AdmissionService;
use admission_web::{IdentityVerifier, StaticTokenVerifier};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,ticketing=debug,sqlx=warn";

/// The HTTP state and the scheduler that must run beside it.
pub struct Wiring {
    /// Router state
    pub state: AppState,
    /// Expiration scheduler fed by the service
    pub scheduler: ExpirationScheduler,
}

/// Wires the admission service, scheduler and HTTP state from resources.
///
/// This is the dependency-injection root: every collaborator is passed in,
/// nothing is looked up globally.
#[must_use]
pub fn wire(
    config: &Config,
    resources: ResourceManager,
    identity: Arc<dyn IdentityVerifier>,
    metrics: Option<Arc<MetricsRecorder>>,
) -> Wiring {
    let (handle, inbox) = ExpirationScheduler::channel();

    let service = Arc::new(AdmissionService::new(
        resources.store.clone(),
        resources.payment_gateway,
        resources.rate_limiter,
        resources.clock.clone(),
        handle,
        config.admission_config(),
    ));

    let scheduler = ExpirationScheduler::new(
        inbox,
        resources.store,
        service.clone(),
        resources.clock.clone(),
        config.sweep_interval(),
    );

    let state = AppState {
        service,
        sellers: resources.sellers,
        identity,
        webhooks: Arc::new(WebhookVerifier::new(
            config.webhook.signing_secret.clone(),
            config.webhook.tolerance_seconds,
        )),
        clock: resources.clock,
        readiness: resources.readiness,
        metrics,
    };

    Wiring { state, scheduler }
}

/// Builder for a fully configured ticketing server.
pub struct ApplicationBuilder {
    /// Application configuration
    config: Option<Arc<Config>>,

    /// Infrastructure resources
    resources: Option<ResourceManager>,

    /// Installed Prometheus recorder
    metrics: Option<Arc<MetricsRecorder>>,

    /// Caller identity; defaults to the configured static tokens
    identity: Option<Arc<dyn IdentityVerifier>>,
}

impl ApplicationBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            resources: None,
            metrics: None,
            identity: None,
        }
    }

    /// Set application configuration. Call first.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    /// Install the `tracing` subscriber (`RUST_LOG`, default
    /// [`DEFAULT_LOG_FILTER`]).
    ///
    /// # Errors
    ///
    /// Returns error if a global subscriber is already installed.
    pub fn with_tracing(self) -> Result<Self, Box<dyn std::error::Error>> {
        tracing_subscriber::registry()
            .with(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
            )
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;

        Ok(self)
    }

    /// Install the Prometheus recorder when `METRICS_ENABLED` is true.
    ///
    /// # Errors
    ///
    /// Returns error if config is missing or the recorder cannot be installed.
    pub fn with_metrics(mut self) -> Result<Self, Box<dyn std::error::Error>> {
        let config = self
            .config
            .as_ref()
            .ok_or("Config must be set before installing metrics")?;

        if config.server.metrics_enabled {
            let mut recorder = MetricsRecorder::new();
            recorder.install()?;
            register_edge_metrics();
            self.metrics = Some(Arc::new(recorder));
        } else {
            tracing::info!("Metrics disabled");
        }

        Ok(self)
    }

    /// Connect infrastructure (database, provider).
    ///
    /// # Errors
    ///
    /// Returns error if config is missing or any connection fails.
    pub async fn with_resources(mut self) -> Result<Self, Box<dyn std::error::Error>> {
        let config = self
            .config
            .as_ref()
            .ok_or("Config must be set before initializing resources")?;

        self.resources = Some(ResourceManager::from_config(config).await?);
        Ok(self)
    }

    /// Use pre-built resources instead of connecting (tests, demos).
    #[must_use]
    pub fn with_existing_resources(mut self, resources: ResourceManager) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Replace the static-token verifier with a real identity provider.
    #[must_use]
    pub fn with_identity(mut self, identity: Arc<dyn IdentityVerifier>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Wire everything and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns error if a step was skipped or the address cannot be bound.
    pub async fn build(self) -> Result<Application, Box<dyn std::error::Error>> {
        let config = self.config.ok_or("Config must be set")?;
        let resources = self.resources.ok_or("Resources must be initialized")?;

        let identity = self.identity.unwrap_or_else(|| {
            if config.auth.tokens.is_empty() {
                tracing::warn!("No AUTH_TOKENS configured, every authenticated route will return 401");
            }
            let verifier: Arc<dyn IdentityVerifier> =
                Arc::new(config.auth.tokens.iter().cloned().collect::<StaticTokenVerifier>());
            verifier
        });

        let Wiring { state, scheduler } = wire(&config, resources, identity, self.metrics);

        if state.webhooks.is_configured() {
            tracing::info!("Payment webhook verification enabled");
        } else {
            tracing::warn!("WEBHOOK_SIGNING_SECRET not set, payment notifications will be refused");
        }

        let router = build_router(state);
        let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
        let (shutdown_tx, _) = broadcast::channel(4);

        Ok(Application::new(listener, router, scheduler, shutdown_tx, config))
    }
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
