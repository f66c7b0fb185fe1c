//! Storage abstraction.
//!
//! Every capacity-affecting read-then-write runs inside an
//! [`EventUnitOfWork`]: an exclusive, transactional view of one event. The
//! Postgres store implements it with `SELECT ... FOR UPDATE` on the event row,
//! the in-memory store with a per-event async mutex. Different events never
//! contend.

use crate::error::AdmissionResult;
use crate::ledger::EventLedger;
use crate::types::{EventId, EventInfo, ExpirationJob, Payment, PaymentId, SessionRef, Ticket};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Exclusive, transactional view of one event.
///
/// Dropping a unit of work without calling [`EventUnitOfWork::commit`] rolls
/// it back.
#[async_trait]
pub trait EventUnitOfWork: Send {
    /// The event's state as loaded under the lock
    fn ledger(&self) -> &EventLedger;

    /// Mutable state; changes are tracked and written on commit
    fn ledger_mut(&mut self) -> &mut EventLedger;

    /// Next value of the global FIFO sequence.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the sequence cannot be advanced.
    async fn next_sequence(&mut self) -> AdmissionResult<i64>;

    /// Writes the ledger's tracked changes and releases the lock.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the write fails; nothing is persisted then.
    async fn commit(self: Box<Self>) -> AdmissionResult<()>;
}

/// Persistent state of the admission engine.
#[async_trait]
pub trait AdmissionStore: Send + Sync {
    /// Registers an event or updates its capacity and price (catalog hook).
    ///
    /// # Errors
    ///
    /// Returns `Storage` on write failure.
    async fn put_event(&self, event: EventInfo) -> AdmissionResult<()>;

    /// Opens the event's unit of work, waiting for any other holder.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown event, `Storage` on failure.
    async fn begin(&self, event_id: EventId) -> AdmissionResult<Box<dyn EventUnitOfWork>>;

    /// Read-only snapshot of an event, without taking the lock.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown event, `Storage` on failure.
    async fn load(&self, event_id: EventId) -> AdmissionResult<EventLedger>;

    /// Finds the payment that owns a gateway session.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on failure.
    async fn find_payment_by_session(
        &self,
        session_ref: &SessionRef,
    ) -> AdmissionResult<Option<Payment>>;

    /// Finds the ticket issued for a payment.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on failure.
    async fn find_ticket_by_payment(&self, payment_id: PaymentId) -> AdmissionResult<Option<Ticket>>;

    /// Every expiration job not yet completed, soonest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on failure.
    async fn pending_expirations(&self) -> AdmissionResult<Vec<ExpirationJob>>;

    /// Uncompleted jobs with `fire_at <= now`, soonest first, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on failure.
    async fn due_expirations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AdmissionResult<Vec<ExpirationJob>>;
}

/// Side channel for merchant capability updates.
#[async_trait]
pub trait SellerAccounts: Send + Sync {
    /// Records whether a merchant account may take charges.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on write failure.
    async fn set_charges_enabled(&self, account_id: &str, enabled: bool) -> AdmissionResult<()>;

    /// Last known capability flag, `None` for unknown accounts.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on failure.
    async fn charges_enabled(&self, account_id: &str) -> AdmissionResult<Option<bool>>;
}
