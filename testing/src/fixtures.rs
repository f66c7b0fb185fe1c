//! Ready-made domain values for tests.

use crate::mocks::test_clock;
use admission_core::ledger::EventLedger;
use admission_core::reducer::AdmissionEnvironment;
use admission_core::types::{EventId, EventInfo};
use std::sync::Arc;

/// Ticket price used by fixture events, in cents
pub const PRICE_CENTS: u64 = 4_500;

/// A fresh priced event with `total_tickets` capacity.
#[must_use]
pub fn event(total_tickets: u32) -> EventInfo {
    EventInfo::new(EventId::new(), total_tickets).with_price(PRICE_CENTS)
}

/// An empty ledger for a fresh event.
#[must_use]
pub fn ledger(total_tickets: u32) -> EventLedger {
    EventLedger::empty(event(total_tickets))
}

/// Reducer environment on the fixed test clock with the default offer TTL.
#[must_use]
pub fn environment() -> AdmissionEnvironment {
    AdmissionEnvironment::new(
        Arc::new(test_clock()),
        chrono::Duration::seconds(AdmissionEnvironment::DEFAULT_OFFER_TTL_SECONDS),
    )
}

/// Installs a compact `tracing` subscriber for a test binary. Safe to call
/// more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,admission_runtime=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
