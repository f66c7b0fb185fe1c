//! In-memory admission store.
//!
//! Each event lives behind its own `tokio::sync::Mutex`; a unit of work owns
//! the guard for its whole lifetime and mutates a working copy of the ledger,
//! so dropping it without commit leaves the stored state untouched.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned std locks

use admission_core::error::{AdmissionError, AdmissionResult};
use admission_core::ledger::EventLedger;
use admission_core::store::{AdmissionStore, EventUnitOfWork, SellerAccounts};
use admission_core::types::{
    EntryId, EventId, EventInfo, ExpirationJob, Payment, PaymentId, SessionRef, Ticket,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy)]
struct JobRow {
    job: ExpirationJob,
    completed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    events: RwLock<HashMap<EventId, Arc<Mutex<EventLedger>>>>,
    jobs: RwLock<HashMap<EntryId, JobRow>>,
    sellers: RwLock<HashMap<String, bool>>,
    sequence: AtomicI64,
    fail_next_commit: AtomicBool,
    commits: AtomicUsize,
}

/// `HashMap`-backed store for fast, deterministic tests.
///
/// # Example
///
/// ```
/// use admission_testing::InMemoryAdmissionStore;
/// use admission_core::store::AdmissionStore;
/// use admission_core::types::{EventId, EventInfo};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryAdmissionStore::new();
/// let event = EventInfo::new(EventId::new(), 10);
/// store.put_event(event.clone()).await?;
///
/// let ledger = store.load(event.id).await?;
/// assert_eq!(ledger.event().total_tickets, 10);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryAdmissionStore {
    shared: Arc<Shared>,
}

impl InMemoryAdmissionStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit fail with a storage error, after which the
    /// store behaves normally again.
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of successful commits
    #[must_use]
    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Every persisted expiration job with its completion flag.
    #[must_use]
    pub fn expiration_jobs(&self) -> Vec<(ExpirationJob, bool)> {
        let mut jobs: Vec<_> = self
            .shared
            .jobs
            .read()
            .unwrap()
            .values()
            .map(|row| (row.job, row.completed))
            .collect();
        jobs.sort_by_key(|(job, _)| (job.fire_at, job.entry_id));
        jobs
    }

    fn slot(&self, event_id: EventId) -> AdmissionResult<Arc<Mutex<EventLedger>>> {
        self.shared
            .events
            .read()
            .unwrap()
            .get(&event_id)
            .cloned()
            .ok_or_else(|| AdmissionError::not_found("event", event_id))
    }

    fn slots(&self) -> Vec<Arc<Mutex<EventLedger>>> {
        self.shared.events.read().unwrap().values().cloned().collect()
    }

    fn jobs_where(&self, keep: impl Fn(&ExpirationJob) -> bool) -> Vec<ExpirationJob> {
        let mut jobs: Vec<_> = self
            .shared
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|row| !row.completed && keep(&row.job))
            .map(|row| row.job)
            .collect();
        jobs.sort_by_key(|job| (job.fire_at, job.entry_id));
        jobs
    }
}

/// Unit of work holding one event's mutex.
struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<EventLedger>,
    working: EventLedger,
    shared: Arc<Shared>,
}

#[async_trait]
impl EventUnitOfWork for InMemoryUnitOfWork {
    fn ledger(&self) -> &EventLedger {
        &self.working
    }

    fn ledger_mut(&mut self) -> &mut EventLedger {
        &mut self.working
    }

    async fn next_sequence(&mut self) -> AdmissionResult<i64> {
        Ok(self.shared.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn commit(self: Box<Self>) -> AdmissionResult<()> {
        let Self {
            mut guard,
            mut working,
            shared,
        } = *self;

        if shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(AdmissionError::storage("injected commit failure"));
        }

        let changes = working.take_changes();
        {
            let mut jobs = shared.jobs.write().unwrap();
            for job in changes.scheduled {
                jobs.insert(
                    job.entry_id,
                    JobRow {
                        job,
                        completed: false,
                    },
                );
            }
            for entry_id in changes.completed {
                if let Some(row) = jobs.get_mut(&entry_id) {
                    row.completed = true;
                }
            }
        }

        *guard = working;
        shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AdmissionStore for InMemoryAdmissionStore {
    async fn put_event(&self, event: EventInfo) -> AdmissionResult<()> {
        let existing = self.shared.events.read().unwrap().get(&event.id).cloned();
        match existing {
            Some(slot) => {
                let mut ledger = slot.lock().await;
                *ledger = EventLedger::new(
                    event,
                    ledger.entries().to_vec(),
                    ledger.payments().to_vec(),
                    ledger.tickets().to_vec(),
                );
            }
            None => {
                self.shared
                    .events
                    .write()
                    .unwrap()
                    .entry(event.id)
                    .or_insert_with(|| Arc::new(Mutex::new(EventLedger::empty(event))));
            }
        }
        Ok(())
    }

    async fn begin(&self, event_id: EventId) -> AdmissionResult<Box<dyn EventUnitOfWork>> {
        let guard = self.slot(event_id)?.lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            working,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn load(&self, event_id: EventId) -> AdmissionResult<EventLedger> {
        let slot = self.slot(event_id)?;
        let ledger = slot.lock().await.clone();
        Ok(ledger)
    }

    async fn find_payment_by_session(
        &self,
        session_ref: &SessionRef,
    ) -> AdmissionResult<Option<Payment>> {
        for slot in self.slots() {
            let ledger = slot.lock().await;
            if let Some(payment) = ledger
                .payments()
                .iter()
                .find(|payment| payment.session_ref.as_ref() == Some(session_ref))
            {
                return Ok(Some(payment.clone()));
            }
        }
        Ok(None)
    }

    async fn find_ticket_by_payment(&self, payment_id: PaymentId) -> AdmissionResult<Option<Ticket>> {
        for slot in self.slots() {
            let ledger = slot.lock().await;
            if let Some(ticket) = ledger.ticket_for_payment(payment_id) {
                return Ok(Some(ticket.clone()));
            }
        }
        Ok(None)
    }

    async fn pending_expirations(&self) -> AdmissionResult<Vec<ExpirationJob>> {
        Ok(self.jobs_where(|_| true))
    }

    async fn due_expirations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AdmissionResult<Vec<ExpirationJob>> {
        let mut jobs = self.jobs_where(|job| job.fire_at <= now);
        jobs.truncate(limit);
        Ok(jobs)
    }
}

#[async_trait]
impl SellerAccounts for InMemoryAdmissionStore {
    async fn set_charges_enabled(&self, account_id: &str, enabled: bool) -> AdmissionResult<()> {
        self.shared
            .sellers
            .write()
            .unwrap()
            .insert(account_id.to_string(), enabled);
        Ok(())
    }

    async fn charges_enabled(&self, account_id: &str) -> AdmissionResult<Option<bool>> {
        Ok(self.shared.sellers.read().unwrap().get(account_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use admission_core::types::{UserId, WaitingListEntry};

    fn entry(event_id: EventId, seq: i64) -> WaitingListEntry {
        WaitingListEntry::new(EntryId::new(), event_id, UserId::new(), fixtures_now(), seq)
    }

    fn fixtures_now() -> DateTime<Utc> {
        crate::mocks::epoch()
    }

    #[tokio::test]
    async fn unknown_event_is_not_found() {
        let store = InMemoryAdmissionStore::new();
        assert!(matches!(
            store.begin(EventId::new()).await.err(),
            Some(AdmissionError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let store = InMemoryAdmissionStore::new();
        let event = fixtures::event(1);
        store.put_event(event.clone()).await.unwrap();

        {
            let mut uow = store.begin(event.id).await.unwrap();
            uow.ledger_mut().insert_entry(entry(event.id, 1));
        }

        assert!(store.load(event.id).await.unwrap().entries().is_empty());
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn commit_persists_and_injected_failure_does_not() {
        let store = InMemoryAdmissionStore::new();
        let event = fixtures::event(1);
        store.put_event(event.clone()).await.unwrap();

        store.fail_next_commit();
        let mut uow = store.begin(event.id).await.unwrap();
        uow.ledger_mut().insert_entry(entry(event.id, 1));
        assert!(uow.commit().await.is_err());
        assert!(store.load(event.id).await.unwrap().entries().is_empty());

        let mut uow = store.begin(event.id).await.unwrap();
        uow.ledger_mut().insert_entry(entry(event.id, 2));
        uow.commit().await.unwrap();
        assert_eq!(store.load(event.id).await.unwrap().entries().len(), 1);
    }

    #[tokio::test]
    async fn put_event_keeps_queue_activity() {
        let store = InMemoryAdmissionStore::new();
        let event = fixtures::event(1);
        store.put_event(event.clone()).await.unwrap();

        let mut uow = store.begin(event.id).await.unwrap();
        uow.ledger_mut().insert_entry(entry(event.id, 1));
        uow.commit().await.unwrap();

        store
            .put_event(EventInfo {
                total_tickets: 3,
                ..event.clone()
            })
            .await
            .unwrap();
        let ledger = store.load(event.id).await.unwrap();
        assert_eq!(ledger.event().total_tickets, 3);
        assert_eq!(ledger.entries().len(), 1);
    }

    #[tokio::test]
    async fn jobs_are_due_by_fire_time_until_completed() {
        let store = InMemoryAdmissionStore::new();
        let event = fixtures::event(2);
        store.put_event(event.clone()).await.unwrap();
        let now = fixtures_now();
        let (early, late) = (EntryId::new(), EntryId::new());

        let mut uow = store.begin(event.id).await.unwrap();
        uow.ledger_mut().schedule_expiration(ExpirationJob {
            entry_id: late,
            event_id: event.id,
            fire_at: now + chrono::Duration::minutes(10),
        });
        uow.ledger_mut().schedule_expiration(ExpirationJob {
            entry_id: early,
            event_id: event.id,
            fire_at: now,
        });
        uow.commit().await.unwrap();

        let pending = store.pending_expirations().await.unwrap();
        assert_eq!(
            pending.iter().map(|job| job.entry_id).collect::<Vec<_>>(),
            vec![early, late]
        );
        let due = store.due_expirations(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);

        let mut uow = store.begin(event.id).await.unwrap();
        uow.ledger_mut().complete_expiration(early);
        uow.commit().await.unwrap();
        assert!(store.due_expirations(now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn seller_flags_are_cached() {
        let store = InMemoryAdmissionStore::new();
        assert_eq!(store.charges_enabled("acct_1").await.unwrap(), None);
        store.set_charges_enabled("acct_1", true).await.unwrap();
        assert_eq!(store.charges_enabled("acct_1").await.unwrap(), Some(true));
    }
}
