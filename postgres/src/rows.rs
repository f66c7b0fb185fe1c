//! Row mapping between sqlx and domain types.

use admission_core::error::{AdmissionError, AdmissionResult};
use admission_core::types::{
    EntryId, EventId, EventInfo, ExpirationJob, Payment, PaymentId, PaymentStatus, SessionRef,
    Ticket, TicketId, TicketStatus, UserId, WaitingListEntry, WaitingListStatus,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

pub(crate) fn event(row: &PgRow) -> AdmissionResult<EventInfo> {
    let total_tickets: i32 = row.get("total_tickets");
    let price_cents: i64 = row.get("price_cents");
    Ok(EventInfo {
        id: EventId::from_uuid(row.get("id")),
        total_tickets: u32::try_from(total_tickets)
            .map_err(|_| AdmissionError::storage(format!("negative capacity: {total_tickets}")))?,
        price_cents: u64::try_from(price_cents)
            .map_err(|_| AdmissionError::storage(format!("negative price: {price_cents}")))?,
        cancelled: row.get("cancelled"),
    })
}

pub(crate) fn entry(row: &PgRow) -> AdmissionResult<WaitingListEntry> {
    let status: String = row.get("status");
    Ok(WaitingListEntry {
        id: EntryId::from_uuid(row.get("id")),
        event_id: EventId::from_uuid(row.get("event_id")),
        user_id: UserId::from_uuid(row.get("user_id")),
        status: WaitingListStatus::parse(&status)?,
        offer_expires_at: row.get("offer_expires_at"),
        joined_at: row.get("joined_at"),
        seq: row.get("seq"),
    })
}

pub(crate) fn payment(row: &PgRow) -> AdmissionResult<Payment> {
    let status: String = row.get("status");
    let entry_id: Option<Uuid> = row.get("waiting_list_entry_id");
    let session_ref: Option<String> = row.get("session_ref");
    Ok(Payment {
        id: PaymentId::from_uuid(row.get("id")),
        event_id: EventId::from_uuid(row.get("event_id")),
        user_id: UserId::from_uuid(row.get("user_id")),
        entry_id: entry_id.map(EntryId::from_uuid),
        session_ref: session_ref.map(SessionRef::new),
        payment_intent: row.get("payment_intent"),
        status: PaymentStatus::parse(&status)?,
        created_at: row.get("created_at"),
    })
}

pub(crate) fn ticket(row: &PgRow) -> AdmissionResult<Ticket> {
    let status: String = row.get("status");
    Ok(Ticket {
        id: TicketId::from_uuid(row.get("id")),
        event_id: EventId::from_uuid(row.get("event_id")),
        user_id: UserId::from_uuid(row.get("user_id")),
        payment_id: PaymentId::from_uuid(row.get("payment_id")),
        status: TicketStatus::parse(&status)?,
        purchased_at: row.get("purchased_at"),
    })
}

pub(crate) fn job(row: &PgRow) -> ExpirationJob {
    ExpirationJob {
        entry_id: EntryId::from_uuid(row.get("entry_id")),
        event_id: EventId::from_uuid(row.get("event_id")),
        fire_at: row.get("fire_at"),
    }
}

pub(crate) fn collect<T>(
    rows: &[PgRow],
    map: impl Fn(&PgRow) -> AdmissionResult<T>,
) -> AdmissionResult<Vec<T>> {
    rows.iter().map(map).collect()
}
