//! Per-event working state.
//!
//! An [`EventLedger`] is everything the engine knows about one event, loaded
//! inside an event-scoped unit of work. Mutations go through the ledger so it
//! can report exactly what changed; the store then persists that
//! [`ChangeSet`] in the same transaction that holds the event lock.

use crate::capacity::{CapacityAccountant, CapacitySnapshot};
use crate::types::{
    EntryId, EventInfo, ExpirationJob, Payment, PaymentId, PaymentStatus, Ticket, TicketId,
    UserId, WaitingListEntry, WaitingListStatus,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Rows touched by a unit of work, ready to be written back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Inserted or updated waiting-list entries
    pub entries: Vec<WaitingListEntry>,
    /// Inserted or updated payments
    pub payments: Vec<Payment>,
    /// Inserted or updated tickets
    pub tickets: Vec<Ticket>,
    /// Updated event flags
    pub event: Option<EventInfo>,
    /// Expiration jobs to persist
    pub scheduled: Vec<ExpirationJob>,
    /// Expiration jobs to mark completed
    pub completed: Vec<EntryId>,
}

impl ChangeSet {
    /// Nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
            && self.payments.is_empty()
            && self.tickets.is_empty()
            && self.event.is_none()
            && self.scheduled.is_empty()
            && self.completed.is_empty()
    }
}

/// Working copy of one event's admission state with change tracking.
#[derive(Debug, Clone)]
pub struct EventLedger {
    event: EventInfo,
    entries: Vec<WaitingListEntry>,
    payments: Vec<Payment>,
    tickets: Vec<Ticket>,
    dirty_entries: BTreeSet<EntryId>,
    dirty_payments: BTreeSet<PaymentId>,
    dirty_tickets: BTreeSet<TicketId>,
    event_dirty: bool,
    scheduled: Vec<ExpirationJob>,
    completed: Vec<EntryId>,
}

impl EventLedger {
    /// Builds a ledger from rows loaded by a store.
    #[must_use]
    pub fn new(
        event: EventInfo,
        mut entries: Vec<WaitingListEntry>,
        payments: Vec<Payment>,
        tickets: Vec<Ticket>,
    ) -> Self {
        entries.sort_by_key(|entry| entry.seq);
        Self {
            event,
            entries,
            payments,
            tickets,
            dirty_entries: BTreeSet::new(),
            dirty_payments: BTreeSet::new(),
            dirty_tickets: BTreeSet::new(),
            event_dirty: false,
            scheduled: Vec::new(),
            completed: Vec::new(),
        }
    }

    /// An event with no queue activity yet.
    #[must_use]
    pub fn empty(event: EventInfo) -> Self {
        Self::new(event, Vec::new(), Vec::new(), Vec::new())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The event's catalog view
    #[must_use]
    pub const fn event(&self) -> &EventInfo {
        &self.event
    }

    /// Entries ordered by `seq`
    #[must_use]
    pub fn entries(&self) -> &[WaitingListEntry] {
        &self.entries
    }

    /// All payments for the event
    #[must_use]
    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    /// All tickets for the event
    #[must_use]
    pub fn tickets(&self) -> &[Ticket] {
        &self.tickets
    }

    /// Capacity as of `now`.
    #[must_use]
    pub fn capacity(&self, now: DateTime<Utc>) -> CapacitySnapshot {
        CapacityAccountant::compute(self.event.total_tickets, &self.tickets, &self.entries, now)
    }

    /// Looks up an entry by id
    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<&WaitingListEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// The user's non-expired entry, if any.
    #[must_use]
    pub fn active_entry_for(&self, user_id: UserId) -> Option<&WaitingListEntry> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.user_id == user_id && entry.status != WaitingListStatus::Expired)
    }

    /// The user's entry currently in `offered`, regardless of its deadline.
    #[must_use]
    pub fn offered_entry_for(&self, user_id: UserId) -> Option<&WaitingListEntry> {
        self.entries
            .iter()
            .find(|entry| entry.user_id == user_id && entry.status == WaitingListStatus::Offered)
    }

    /// Up to `limit` waiting entries, oldest first.
    #[must_use]
    pub fn oldest_waiting(&self, limit: usize) -> Vec<EntryId> {
        self.entries
            .iter()
            .filter(|entry| entry.status == WaitingListStatus::Waiting)
            .take(limit)
            .map(|entry| entry.id)
            .collect()
    }

    /// Looks up a payment by id
    #[must_use]
    pub fn payment(&self, id: PaymentId) -> Option<&Payment> {
        self.payments.iter().find(|payment| payment.id == id)
    }

    /// Payments still waiting for a confirmation
    #[must_use]
    pub fn pending_payments(&self) -> Vec<PaymentId> {
        self.payments
            .iter()
            .filter(|payment| payment.status == PaymentStatus::Pending)
            .map(|payment| payment.id)
            .collect()
    }

    /// The ticket produced by a payment
    #[must_use]
    pub fn ticket_for_payment(&self, payment_id: PaymentId) -> Option<&Ticket> {
        self.tickets.iter().find(|ticket| ticket.payment_id == payment_id)
    }

    /// The user's most recent ticket for this event
    #[must_use]
    pub fn ticket_for_user(&self, user_id: UserId) -> Option<&Ticket> {
        self.tickets
            .iter()
            .filter(|ticket| ticket.user_id == user_id)
            .max_by_key(|ticket| ticket.purchased_at)
    }

    // ------------------------------------------------------------------
    // Tracked writes
    // ------------------------------------------------------------------

    /// Mutable access to an entry; the entry is written back on commit.
    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut WaitingListEntry> {
        let entry = self.entries.iter_mut().find(|entry| entry.id == id)?;
        self.dirty_entries.insert(id);
        Some(entry)
    }

    /// Adds a new entry, keeping `seq` order.
    pub fn insert_entry(&mut self, entry: WaitingListEntry) {
        let index = self.entries.partition_point(|existing| existing.seq < entry.seq);
        self.dirty_entries.insert(entry.id);
        self.entries.insert(index, entry);
    }

    /// Mutable access to a payment; the payment is written back on commit.
    pub fn payment_mut(&mut self, id: PaymentId) -> Option<&mut Payment> {
        let payment = self.payments.iter_mut().find(|payment| payment.id == id)?;
        self.dirty_payments.insert(id);
        Some(payment)
    }

    /// Adds a new payment.
    pub fn insert_payment(&mut self, payment: Payment) {
        self.dirty_payments.insert(payment.id);
        self.payments.push(payment);
    }

    /// Mutable access to a ticket; the ticket is written back on commit.
    pub fn ticket_mut(&mut self, id: TicketId) -> Option<&mut Ticket> {
        let ticket = self.tickets.iter_mut().find(|ticket| ticket.id == id)?;
        self.dirty_tickets.insert(id);
        Some(ticket)
    }

    /// Adds a new ticket.
    pub fn insert_ticket(&mut self, ticket: Ticket) {
        self.dirty_tickets.insert(ticket.id);
        self.tickets.push(ticket);
    }

    /// Replaces the event's capacity and price.
    pub fn set_capacity(&mut self, total_tickets: u32, price_cents: u64) {
        self.event.total_tickets = total_tickets;
        self.event.price_cents = price_cents;
        self.event_dirty = true;
    }

    /// Flags the event as cancelled.
    pub fn mark_cancelled(&mut self) {
        self.event.cancelled = true;
        self.event_dirty = true;
    }

    /// Persists an expiration job with the rest of the changes.
    pub fn schedule_expiration(&mut self, job: ExpirationJob) {
        self.scheduled.push(job);
    }

    /// Marks the entry's expiration job completed with the rest of the changes.
    pub fn complete_expiration(&mut self, entry_id: EntryId) {
        self.completed.push(entry_id);
    }

    /// Anything to write?
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !(self.dirty_entries.is_empty()
            && self.dirty_payments.is_empty()
            && self.dirty_tickets.is_empty()
            && !self.event_dirty
            && self.scheduled.is_empty()
            && self.completed.is_empty())
    }

    /// Drains the tracked changes.
    pub fn take_changes(&mut self) -> ChangeSet {
        let dirty_entries = std::mem::take(&mut self.dirty_entries);
        let dirty_payments = std::mem::take(&mut self.dirty_payments);
        let dirty_tickets = std::mem::take(&mut self.dirty_tickets);

        ChangeSet {
            entries: self
                .entries
                .iter()
                .filter(|entry| dirty_entries.contains(&entry.id))
                .cloned()
                .collect(),
            payments: self
                .payments
                .iter()
                .filter(|payment| dirty_payments.contains(&payment.id))
                .cloned()
                .collect(),
            tickets: self
                .tickets
                .iter()
                .filter(|ticket| dirty_tickets.contains(&ticket.id))
                .cloned()
                .collect(),
            event: std::mem::take(&mut self.event_dirty).then(|| self.event.clone()),
            scheduled: std::mem::take(&mut self.scheduled),
            completed: std::mem::take(&mut self.completed),
        }
    }
}
