//! Event-locked store on sqlx.

use crate::{rows, storage};
use admission_core::error::{AdmissionError, AdmissionResult};
use admission_core::ledger::{ChangeSet, EventLedger};
use admission_core::store::{AdmissionStore, EventUnitOfWork, SellerAccounts};
use admission_core::types::{
    EventId, EventInfo, ExpirationJob, Payment, PaymentId, SessionRef, Ticket,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

const EVENT_COLUMNS: &str = "id, total_tickets, price_cents, cancelled";

/// `PostgreSQL`-backed admission store.
///
/// Every unit of work is a transaction that first locks the event row, so
/// concurrent operations on one event serialize while different events
/// proceed in parallel.
#[derive(Clone, Debug)]
pub struct PostgresAdmissionStore {
    pool: PgPool,
}

impl PostgresAdmissionStore {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> AdmissionResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| AdmissionError::storage(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Runs the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if a migration fails.
    pub async fn migrate(&self) -> AdmissionResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AdmissionError::storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Cheap connectivity check for readiness.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the database does not answer.
    pub async fn ping(&self) -> AdmissionResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

async fn load_ledger(conn: &mut PgConnection, event: EventInfo) -> AdmissionResult<EventLedger> {
    let event_id = *event.id.as_uuid();

    let entries = sqlx::query(
        r"
        SELECT id, event_id, user_id, status, offer_expires_at, joined_at, seq
        FROM waiting_list
        WHERE event_id = $1
        ORDER BY seq ASC
        ",
    )
    .bind(event_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage)?;

    let payments = sqlx::query(
        r"
        SELECT id, event_id, user_id, waiting_list_entry_id, session_ref,
               payment_intent, status, created_at
        FROM payments
        WHERE event_id = $1
        ORDER BY created_at ASC
        ",
    )
    .bind(event_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage)?;

    let tickets = sqlx::query(
        r"
        SELECT id, event_id, user_id, payment_id, status, purchased_at
        FROM tickets
        WHERE event_id = $1
        ORDER BY purchased_at ASC
        ",
    )
    .bind(event_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage)?;

    Ok(EventLedger::new(
        event,
        rows::collect(&entries, rows::entry)?,
        rows::collect(&payments, rows::payment)?,
        rows::collect(&tickets, rows::ticket)?,
    ))
}

async fn write_changes(conn: &mut PgConnection, changes: ChangeSet) -> AdmissionResult<()> {
    for entry in &changes.entries {
        sqlx::query(
            r"
            INSERT INTO waiting_list (id, event_id, user_id, status, offer_expires_at, joined_at, seq)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status, offer_expires_at = EXCLUDED.offer_expires_at
            ",
        )
        .bind(*entry.id.as_uuid())
        .bind(*entry.event_id.as_uuid())
        .bind(*entry.user_id.as_uuid())
        .bind(entry.status.as_str())
        .bind(entry.offer_expires_at)
        .bind(entry.joined_at)
        .bind(entry.seq)
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    }

    for payment in &changes.payments {
        sqlx::query(
            r"
            INSERT INTO payments (id, event_id, user_id, waiting_list_entry_id, session_ref,
                                  payment_intent, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET session_ref = EXCLUDED.session_ref,
                payment_intent = EXCLUDED.payment_intent,
                status = EXCLUDED.status
            ",
        )
        .bind(*payment.id.as_uuid())
        .bind(*payment.event_id.as_uuid())
        .bind(*payment.user_id.as_uuid())
        .bind(payment.entry_id.map(|id| *id.as_uuid()))
        .bind(payment.session_ref.as_ref().map(SessionRef::as_str))
        .bind(payment.payment_intent.as_deref())
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    }

    for ticket in &changes.tickets {
        sqlx::query(
            r"
            INSERT INTO tickets (id, event_id, user_id, payment_id, status, purchased_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status
            ",
        )
        .bind(*ticket.id.as_uuid())
        .bind(*ticket.event_id.as_uuid())
        .bind(*ticket.user_id.as_uuid())
        .bind(*ticket.payment_id.as_uuid())
        .bind(ticket.status.as_str())
        .bind(ticket.purchased_at)
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    }

    if let Some(event) = &changes.event {
        let total_tickets = i32::try_from(event.total_tickets)
            .map_err(|_| AdmissionError::invalid_state("capacity out of range"))?;
        let price_cents = i64::try_from(event.price_cents)
            .map_err(|_| AdmissionError::invalid_state("price out of range"))?;
        sqlx::query(
            r"
            UPDATE events
            SET total_tickets = $2, price_cents = $3, cancelled = $4, updated_at = now()
            WHERE id = $1
            ",
        )
        .bind(*event.id.as_uuid())
        .bind(total_tickets)
        .bind(price_cents)
        .bind(event.cancelled)
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    }

    for job in &changes.scheduled {
        sqlx::query(
            r"
            INSERT INTO offer_expirations (entry_id, event_id, fire_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (entry_id) DO UPDATE
            SET fire_at = EXCLUDED.fire_at, completed_at = NULL
            ",
        )
        .bind(*job.entry_id.as_uuid())
        .bind(*job.event_id.as_uuid())
        .bind(job.fire_at)
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    }

    for entry_id in &changes.completed {
        sqlx::query(
            "UPDATE offer_expirations SET completed_at = now() WHERE entry_id = $1 AND completed_at IS NULL",
        )
        .bind(*entry_id.as_uuid())
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    }

    Ok(())
}

/// Transaction holding the event row lock.
struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
    ledger: EventLedger,
}

#[async_trait]
impl EventUnitOfWork for PostgresUnitOfWork {
    fn ledger(&self) -> &EventLedger {
        &self.ledger
    }

    fn ledger_mut(&mut self) -> &mut EventLedger {
        &mut self.ledger
    }

    async fn next_sequence(&mut self) -> AdmissionResult<i64> {
        let (seq,): (i64,) = sqlx::query_as("SELECT nextval('waiting_list_seq')")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(storage)?;
        Ok(seq)
    }

    async fn commit(self: Box<Self>) -> AdmissionResult<()> {
        let Self { mut tx, mut ledger } = *self;
        let event_id = ledger.event().id;
        let changes = ledger.take_changes();

        if !changes.is_empty() {
            write_changes(&mut tx, changes).await?;
        }
        tx.commit().await.map_err(storage)?;

        tracing::trace!(%event_id, "Unit of work committed");
        Ok(())
    }
}

#[async_trait]
impl AdmissionStore for PostgresAdmissionStore {
    async fn put_event(&self, event: EventInfo) -> AdmissionResult<()> {
        let total_tickets = i32::try_from(event.total_tickets)
            .map_err(|_| AdmissionError::invalid_state("capacity out of range"))?;
        let price_cents = i64::try_from(event.price_cents)
            .map_err(|_| AdmissionError::invalid_state("price out of range"))?;

        sqlx::query(
            r"
            INSERT INTO events (id, total_tickets, price_cents, cancelled)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET total_tickets = EXCLUDED.total_tickets,
                price_cents = EXCLUDED.price_cents,
                updated_at = now()
            ",
        )
        .bind(*event.id.as_uuid())
        .bind(total_tickets)
        .bind(price_cents)
        .bind(event.cancelled)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        tracing::debug!(event_id = %event.id, total_tickets, "Event registered");
        Ok(())
    }

    async fn begin(&self, event_id: EventId) -> AdmissionResult<Box<dyn EventUnitOfWork>> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE"
        ))
        .bind(*event_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?
        .ok_or_else(|| AdmissionError::not_found("event", event_id))?;

        let event = rows::event(&row)?;
        let ledger = load_ledger(&mut tx, event).await?;
        Ok(Box::new(PostgresUnitOfWork { tx, ledger }))
    }

    async fn load(&self, event_id: EventId) -> AdmissionResult<EventLedger> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        // One snapshot for the event and its rows
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(*event_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or_else(|| AdmissionError::not_found("event", event_id))?;

        let ledger = load_ledger(&mut tx, rows::event(&row)?).await?;
        tx.commit().await.map_err(storage)?;
        Ok(ledger)
    }

    async fn find_payment_by_session(
        &self,
        session_ref: &SessionRef,
    ) -> AdmissionResult<Option<Payment>> {
        sqlx::query(
            r"
            SELECT id, event_id, user_id, waiting_list_entry_id, session_ref,
                   payment_intent, status, created_at
            FROM payments
            WHERE session_ref = $1
            ",
        )
        .bind(session_ref.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?
        .as_ref()
        .map(rows::payment)
        .transpose()
    }

    async fn find_ticket_by_payment(&self, payment_id: PaymentId) -> AdmissionResult<Option<Ticket>> {
        sqlx::query(
            r"
            SELECT id, event_id, user_id, payment_id, status, purchased_at
            FROM tickets
            WHERE payment_id = $1
            ",
        )
        .bind(*payment_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?
        .as_ref()
        .map(rows::ticket)
        .transpose()
    }

    async fn pending_expirations(&self) -> AdmissionResult<Vec<ExpirationJob>> {
        let jobs = sqlx::query(
            r"
            SELECT entry_id, event_id, fire_at
            FROM offer_expirations
            WHERE completed_at IS NULL
            ORDER BY fire_at ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(jobs.iter().map(rows::job).collect())
    }

    async fn due_expirations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AdmissionResult<Vec<ExpirationJob>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let jobs = sqlx::query(
            r"
            SELECT entry_id, event_id, fire_at
            FROM offer_expirations
            WHERE completed_at IS NULL AND fire_at <= $1
            ORDER BY fire_at ASC
            LIMIT $2
            ",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(jobs.iter().map(rows::job).collect())
    }
}

#[async_trait]
impl SellerAccounts for PostgresAdmissionStore {
    async fn set_charges_enabled(&self, account_id: &str, enabled: bool) -> AdmissionResult<()> {
        sqlx::query(
            r"
            INSERT INTO seller_accounts (account_id, charges_enabled)
            VALUES ($1, $2)
            ON CONFLICT (account_id) DO UPDATE
            SET charges_enabled = EXCLUDED.charges_enabled, updated_at = now()
            ",
        )
        .bind(account_id)
        .bind(enabled)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        tracing::info!(account_id, charges_enabled = enabled, "Seller capability updated");
        Ok(())
    }

    async fn charges_enabled(&self, account_id: &str) -> AdmissionResult<Option<bool>> {
        let flag: Option<(bool,)> =
            sqlx::query_as("SELECT charges_enabled FROM seller_accounts WHERE account_id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        Ok(flag.map(|(enabled,)| enabled))
    }
}
