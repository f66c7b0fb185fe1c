//! A fully wired admission service on in-memory collaborators.

use crate::fixtures;
use crate::gateway::MockPaymentGateway;
use crate::mocks::TestClock;
use crate::store::InMemoryAdmissionStore;
use admission_core::error::AdmissionResult;
use admission_core::types::{EventId, EventInfo};
use admission_runtime::rate_limit::FixedWindowRateLimiter;
use admission_runtime::retry::RetryPolicy;
use admission_runtime::scheduler::ExpirationScheduler;
use admission_runtime::service::{AdmissionConfig, AdmissionService};
use std::sync::Arc;
use std::time::Duration;

/// Service, scheduler and mocks sharing one [`TestClock`].
///
/// The scheduler is not spawned; tests drive it with [`TestHarness::tick`]
/// after moving the clock.
pub struct TestHarness {
    /// Shared clock
    pub clock: Arc<TestClock>,
    /// In-memory store
    pub store: InMemoryAdmissionStore,
    /// Mock payment provider
    pub gateway: MockPaymentGateway,
    /// Join limiter
    pub rate_limiter: Arc<FixedWindowRateLimiter>,
    /// The service under test
    pub service: Arc<AdmissionService>,
    /// Expiration scheduler fed by the service
    pub scheduler: ExpirationScheduler,
}

impl TestHarness {
    /// Harness with default tunables and no gateway backoff delay.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AdmissionConfig {
            gateway_retry: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(5))
                .jitter(0.0)
                .build(),
            ..AdmissionConfig::default()
        })
    }

    /// Harness with explicit tunables.
    #[must_use]
    pub fn with_config(config: AdmissionConfig) -> Self {
        Self::on_store(InMemoryAdmissionStore::new(), Arc::new(TestClock::default()), config)
    }

    /// Harness reusing an existing store and clock, as after a restart.
    #[must_use]
    pub fn on_store(
        store: InMemoryAdmissionStore,
        clock: Arc<TestClock>,
        config: AdmissionConfig,
    ) -> Self {
        let gateway = MockPaymentGateway::new();
        let rate_limiter = Arc::new(FixedWindowRateLimiter::new());
        let (handle, inbox) = ExpirationScheduler::channel();

        let service = Arc::new(AdmissionService::new(
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            rate_limiter.clone(),
            clock.clone(),
            handle,
            config,
        ));
        let scheduler = ExpirationScheduler::new(
            inbox,
            Arc::new(store.clone()),
            service.clone(),
            clock.clone(),
            Duration::from_secs(1),
        );

        Self {
            clock,
            store,
            gateway,
            rate_limiter,
            service,
            scheduler,
        }
    }

    /// Registers a fresh priced event.
    ///
    /// # Panics
    ///
    /// Panics if registration fails.
    #[allow(clippy::expect_used)]
    pub async fn event(&self, total_tickets: u32) -> EventId {
        let event: EventInfo = fixtures::event(total_tickets);
        self.service
            .register_event(event.clone())
            .await
            .expect("event registration");
        event.id
    }

    /// Moves the clock forward and runs one scheduler tick. Returns the
    /// number of expirations fired.
    pub async fn advance(&mut self, by: chrono::Duration) -> usize {
        self.clock.advance(by);
        self.tick().await
    }

    /// Runs one scheduler tick at the current time.
    pub async fn tick(&mut self) -> usize {
        self.scheduler.tick().await
    }

    /// Fulfills the payment behind a checkout session the way the webhook
    /// would, with the intent the mock provider assigned.
    ///
    /// # Errors
    ///
    /// Returns the service error.
    pub async fn pay(
        &self,
        session_ref: &admission_core::types::SessionRef,
    ) -> AdmissionResult<admission_runtime::service::FulfillmentOutcome> {
        self.service
            .fulfill(session_ref, self.gateway.intent_for(session_ref))
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
