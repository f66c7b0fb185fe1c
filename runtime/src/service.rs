//! The admission service: imperative shell around the admission reducer.
//!
//! Each operation opens the event's unit of work, runs one command through
//! the reducer, commits the tracked changes and only then performs side
//! effects (scheduling expirations, metrics). Gateway calls are always made
//! with no unit of work open.

use crate::metrics::{record_event, record_unit_of_work};
use crate::retry::{RetryPolicy, retry_gateway};
use crate::scheduler::{ExpirationHandler, SchedulerHandle};
use admission_core::capacity::CapacitySnapshot;
use admission_core::environment::Clock;
use admission_core::error::{AdmissionError, AdmissionResult};
use admission_core::gateway::{
    CheckoutMetadata, CheckoutSession, CheckoutSessionRequest, PaymentGateway, RefundRequest,
};
use admission_core::position::QueuePositionResolver;
use admission_core::rate_limit::{JoinRateLimiter, RateLimit};
use admission_core::reducer::{
    AdmissionCommand, AdmissionEnvironment, AdmissionEvent, AdmissionReducer, Reducer,
};
use admission_core::store::{AdmissionStore, EventUnitOfWork};
use admission_core::types::{
    EntryId, EventId, EventInfo, ExpirationJob, Payment, PaymentId, QueuePosition, SessionRef,
    Ticket, TicketId, UserId, WaitingListEntry,
};
use admission_core::SmallVec;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

type Events = SmallVec<[AdmissionEvent; 4]>;

/// Tunables of the admission service.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Lifetime of an offer
    pub offer_ttl: chrono::Duration,
    /// Per-user join limit
    pub join_limit: RateLimit,
    /// Backoff for gateway calls
    pub gateway_retry: RetryPolicy,
    /// Base URL of the public site, used for checkout redirects
    pub public_base_url: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            offer_ttl: chrono::Duration::seconds(AdmissionEnvironment::DEFAULT_OFFER_TTL_SECONDS),
            join_limit: RateLimit::DEFAULT,
            gateway_retry: RetryPolicy::default(),
            public_base_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Result of applying a payment confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FulfillmentOutcome {
    /// A ticket was issued
    Fulfilled {
        /// The issued ticket
        ticket_id: TicketId,
    },
    /// The payment had already been fulfilled
    AlreadyFulfilled,
    /// The checkout was cancelled before the money arrived; it went back
    Refunded,
    /// No payment matches the session
    Ignored,
}

/// Result of an expiration firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationOutcome {
    /// The offer expired and the queue was backfilled
    Expired {
        /// Offers issued by the backfill
        offers_issued: usize,
    },
    /// The entry was no longer offered
    Skipped,
}

/// Public availability of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Availability {
    /// Event
    pub event_id: EventId,
    /// Capacity figures
    #[serde(flatten)]
    pub capacity: CapacitySnapshot,
    /// Nothing left to offer
    pub is_sold_out: bool,
    /// Event was cancelled
    pub cancelled: bool,
}

/// Summary of a successful cancellation batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancellationReport {
    /// Cancelled event
    pub event_id: EventId,
    /// Tickets refunded
    pub refunded_tickets: Vec<TicketId>,
}

/// Dependency-injection root of the admission engine.
pub struct AdmissionService {
    store: Arc<dyn AdmissionStore>,
    gateway: Arc<dyn PaymentGateway>,
    rate_limiter: Arc<dyn JoinRateLimiter>,
    scheduler: SchedulerHandle,
    reducer: AdmissionReducer,
    env: AdmissionEnvironment,
    config: AdmissionConfig,
}

impl AdmissionService {
    /// Wires the service from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn AdmissionStore>,
        gateway: Arc<dyn PaymentGateway>,
        rate_limiter: Arc<dyn JoinRateLimiter>,
        clock: Arc<dyn Clock>,
        scheduler: SchedulerHandle,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            env: AdmissionEnvironment::new(clock, config.offer_ttl),
            store,
            gateway,
            rate_limiter,
            scheduler,
            reducer: AdmissionReducer::new(),
            config,
        }
    }

    /// The configured tunables
    #[must_use]
    pub const fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// The underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AdmissionStore> {
        &self.store
    }

    // ========== Unit-of-work plumbing ==========

    async fn apply(
        &self,
        mut uow: Box<dyn EventUnitOfWork>,
        command: AdmissionCommand,
    ) -> AdmissionResult<Events> {
        let started = Instant::now();
        let event_id = uow.ledger().event().id;

        // A rejected command drops the unit of work, which rolls it back.
        let events = self.reducer.reduce(uow.ledger_mut(), command, &self.env)?;
        uow.commit().await?;
        record_unit_of_work(started.elapsed());

        self.after_commit(event_id, &events);
        Ok(events)
    }

    async fn dispatch(&self, event_id: EventId, command: AdmissionCommand) -> AdmissionResult<Events> {
        let uow = self.store.begin(event_id).await?;
        self.apply(uow, command).await
    }

    fn after_commit(&self, event_id: EventId, events: &[AdmissionEvent]) {
        for event in events {
            record_event(event_id, event);
            if let AdmissionEvent::OfferIssued {
                entry_id,
                user_id,
                expires_at,
            } = event
            {
                tracing::info!(%event_id, %entry_id, %user_id, %expires_at, "Offer issued");
                self.scheduler.schedule(ExpirationJob {
                    entry_id: *entry_id,
                    event_id,
                    fire_at: *expires_at,
                });
            }
        }
    }

    fn offers_issued(events: &[AdmissionEvent]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, AdmissionEvent::OfferIssued { .. }))
            .count()
    }

    // ========== Catalog hook ==========

    /// Registers an event or updates its capacity, then backfills the queue.
    ///
    /// Updates of a known event run under its lock like any other command.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when the event is cancelled, when the capacity of
    /// an event with sold tickets would change or when the new capacity is
    /// below the spots already sold or offered. `Storage` on store failure.
    #[tracing::instrument(skip(self), fields(event_id = %event.id))]
    pub async fn register_event(&self, event: EventInfo) -> AdmissionResult<()> {
        match self.store.begin(event.id).await {
            Ok(uow) => {
                self.apply(
                    uow,
                    AdmissionCommand::UpdateEvent {
                        total_tickets: event.total_tickets,
                        price_cents: event.price_cents,
                    },
                )
                .await?;
            }
            Err(AdmissionError::NotFound { .. }) => {
                let event_id = event.id;
                self.store.put_event(event).await?;
                self.process_queue(event_id).await?;
                tracing::info!("Event registered");
            }
            Err(error) => return Err(error),
        }
        Ok(())
    }

    // ========== Waiting list ==========

    /// Puts the user in line and offers a spot right away if one is free.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event, `InvalidState` for a cancelled event or
    /// a user already in line, `RateLimited` when the user joined too often.
    #[tracing::instrument(skip(self))]
    pub async fn join_queue(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> AdmissionResult<WaitingListEntry> {
        // Validation and the limiter run before the event lock is taken; the
        // limiter may hold its own connection. The reducer validates again.
        AdmissionReducer::validate_join(&self.store.load(event_id).await?, user_id)?;
        self.rate_limiter
            .check_and_record(user_id, self.config.join_limit, self.env.clock.now())
            .await?;

        let mut uow = self.store.begin(event_id).await?;
        let entry_id = EntryId::new();
        let seq = uow.next_sequence().await?;
        self.apply(
            uow,
            AdmissionCommand::Join {
                entry_id,
                user_id,
                seq,
            },
        )
        .await?;

        let entry = self
            .store
            .load(event_id)
            .await?
            .entry(entry_id)
            .cloned()
            .ok_or_else(|| AdmissionError::not_found("waiting list entry", entry_id))?;
        tracing::info!(%entry_id, status = %entry.status, "Joined waiting list");
        Ok(entry)
    }

    /// The user's rank in line, `None` when not queued.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event, `Storage` on failure.
    pub async fn queue_position(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> AdmissionResult<Option<QueuePosition>> {
        let ledger = self.store.load(event_id).await?;
        Ok(QueuePositionResolver::resolve(ledger.entries(), user_id))
    }

    /// Runs the offer issuer for an event. Returns the number of offers issued.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event, `Storage` on failure.
    #[tracing::instrument(skip(self))]
    pub async fn process_queue(&self, event_id: EventId) -> AdmissionResult<usize> {
        let events = self.dispatch(event_id, AdmissionCommand::IssueOffers).await?;
        Ok(Self::offers_issued(&events))
    }

    /// Gives an offer back early and backfills from the queue.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown entry, `InvalidState` when the caller does not
    /// hold that offer.
    #[tracing::instrument(skip(self))]
    pub async fn release_offer(
        &self,
        event_id: EventId,
        entry_id: EntryId,
        user_id: UserId,
    ) -> AdmissionResult<()> {
        self.dispatch(event_id, AdmissionCommand::ReleaseOffer { entry_id, user_id })
            .await?;
        tracing::info!("Offer released");
        Ok(())
    }

    /// Expires an offer whose deadline passed (idempotent).
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event, `Storage` on failure.
    #[tracing::instrument(skip(self))]
    pub async fn expire_offer(
        &self,
        event_id: EventId,
        entry_id: EntryId,
    ) -> AdmissionResult<ExpirationOutcome> {
        let events = self
            .dispatch(event_id, AdmissionCommand::ExpireOffer { entry_id })
            .await?;

        if events
            .iter()
            .any(|event| matches!(event, AdmissionEvent::OfferExpired { .. }))
        {
            tracing::info!("Offer expired");
            Ok(ExpirationOutcome::Expired {
                offers_issued: Self::offers_issued(&events),
            })
        } else {
            Ok(ExpirationOutcome::Skipped)
        }
    }

    /// Current capacity figures.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event, `Storage` on failure.
    pub async fn availability(&self, event_id: EventId) -> AdmissionResult<Availability> {
        let ledger = self.store.load(event_id).await?;
        let capacity = ledger.capacity(self.env.clock.now());
        Ok(Availability {
            event_id,
            capacity,
            is_sold_out: capacity.is_sold_out(),
            cancelled: ledger.event().cancelled,
        })
    }

    // ========== Checkout and fulfillment ==========

    /// Opens a hosted checkout session for the caller's live offer.
    ///
    /// The pending payment is committed first; the gateway is called with no
    /// lock held and the session is attached in a second, short unit of work.
    ///
    /// # Errors
    ///
    /// `InvalidState` without a live offer, `ExternalService` when the gateway
    /// fails after retries (the payment then stays `pending`).
    #[tracing::instrument(skip(self))]
    pub async fn begin_checkout(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> AdmissionResult<CheckoutSession> {
        let payment_id = PaymentId::new();
        let uow = self.store.begin(event_id).await?;
        let amount_cents = uow.ledger().event().price_cents;

        let events = self
            .apply(uow, AdmissionCommand::BeginCheckout { payment_id, user_id })
            .await?;
        let (entry_id, offer_expires_at) = events
            .iter()
            .find_map(|event| match event {
                AdmissionEvent::CheckoutStarted {
                    entry_id,
                    offer_expires_at,
                    ..
                } => Some((*entry_id, *offer_expires_at)),
                _ => None,
            })
            .ok_or_else(|| AdmissionError::invalid_state("checkout was not started"))?;

        let base = self.config.public_base_url.trim_end_matches('/');
        let request = CheckoutSessionRequest {
            payment_id,
            amount_cents,
            expires_at: offer_expires_at,
            metadata: CheckoutMetadata {
                event_id,
                user_id,
                waiting_list_entry_id: Some(entry_id),
            },
            success_url: format!("{base}/tickets/purchase-success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{base}/event/{event_id}"),
        };

        let session = retry_gateway(&self.config.gateway_retry, || {
            self.gateway.create_checkout_session(request.clone())
        })
        .await
        .map_err(|error| {
            tracing::error!(%payment_id, %error, "Checkout session creation failed");
            AdmissionError::ExternalService(error)
        })?;

        self.dispatch(
            event_id,
            AdmissionCommand::AttachSession {
                payment_id,
                session_ref: session.session_ref.clone(),
            },
        )
        .await?;

        tracing::info!(%payment_id, session_ref = %session.session_ref, "Checkout session created");
        Ok(session)
    }

    /// Applies a payment confirmation exactly once.
    ///
    /// A confirmation for a checkout that was cancelled (on its own or with the
    /// event) issues no ticket; the payment is refunded instead.
    ///
    /// # Errors
    ///
    /// `Storage` on failure, `ExternalService` when such a refund fails. The
    /// caller should let the provider redeliver; the refund is idempotent.
    #[tracing::instrument(skip(self, payment_intent), fields(session_ref = %session_ref))]
    pub async fn fulfill(
        &self,
        session_ref: &SessionRef,
        payment_intent: Option<String>,
    ) -> AdmissionResult<FulfillmentOutcome> {
        let Some(mut payment) = self.store.find_payment_by_session(session_ref).await? else {
            tracing::warn!("Payment confirmation for unknown session ignored");
            metrics::counter!("admission_fulfillments_unmatched_total").increment(1);
            return Ok(FulfillmentOutcome::Ignored);
        };

        let ticket_id = TicketId::new();
        let events = self
            .dispatch(
                payment.event_id,
                AdmissionCommand::Fulfill {
                    payment_id: payment.id,
                    ticket_id,
                    payment_intent,
                },
            )
            .await?;

        if events
            .iter()
            .any(|event| matches!(event, AdmissionEvent::FulfillmentSkipped { .. }))
        {
            tracing::info!(payment_id = %payment.id, "Payment already fulfilled");
            return Ok(FulfillmentOutcome::AlreadyFulfilled);
        }

        let voided = events.iter().find_map(|event| match event {
            AdmissionEvent::PaymentVoided { payment_intent, .. } => Some(payment_intent.clone()),
            _ => None,
        });
        if let Some(payment_intent) = voided {
            payment.payment_intent = payment_intent;
            let refund_id = self.refund_payment(&payment).await.inspect_err(|error| {
                tracing::error!(payment_id = %payment.id, %error, "Refund of cancelled checkout failed");
                metrics::counter!("admission_refunds_failed_total").increment(1);
            })?;
            tracing::warn!(payment_id = %payment.id, %refund_id, "Confirmation for cancelled checkout refunded");
            return Ok(FulfillmentOutcome::Refunded);
        }

        tracing::info!(payment_id = %payment.id, %ticket_id, "Payment fulfilled");
        Ok(FulfillmentOutcome::Fulfilled { ticket_id })
    }

    /// The user's ticket for an event.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event, `Storage` on failure.
    pub async fn user_ticket(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> AdmissionResult<Option<Ticket>> {
        let ledger = self.store.load(event_id).await?;
        Ok(ledger.ticket_for_user(user_id).cloned())
    }

    /// The ticket issued for a payment.
    ///
    /// # Errors
    ///
    /// `Storage` on failure.
    pub async fn ticket_for_payment(&self, payment_id: PaymentId) -> AdmissionResult<Option<Ticket>> {
        self.store.find_ticket_by_payment(payment_id).await
    }

    /// The payment behind a checkout session and its ticket, if issued yet.
    ///
    /// Used by the purchase-success page, which only knows the session id.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, `Storage` on failure.
    pub async fn ticket_for_session(
        &self,
        session_ref: &SessionRef,
    ) -> AdmissionResult<(Payment, Option<Ticket>)> {
        let payment = self
            .store
            .find_payment_by_session(session_ref)
            .await?
            .ok_or_else(|| AdmissionError::not_found("checkout session", session_ref))?;
        let ticket = self.store.find_ticket_by_payment(payment.id).await?;
        Ok((payment, ticket))
    }

    // ========== Cancellation ==========

    async fn refund_payment(&self, payment: &Payment) -> AdmissionResult<String> {
        let payment_intent = match (&payment.payment_intent, &payment.session_ref) {
            (Some(intent), _) => intent.clone(),
            (None, Some(session_ref)) => retry_gateway(&self.config.gateway_retry, || {
                self.gateway.retrieve_payment_intent(session_ref)
            })
            .await?,
            (None, None) => {
                return Err(AdmissionError::invalid_state(format!(
                    "payment {} has no gateway reference",
                    payment.id
                )));
            }
        };

        let request = RefundRequest {
            payment_intent,
            idempotency_key: format!("refund-{}", payment.id),
        };
        let refund_id = retry_gateway(&self.config.gateway_retry, || {
            self.gateway.refund(request.clone())
        })
        .await?;
        Ok(refund_id)
    }

    /// Refunds every sold ticket and, only if all refunds succeed, cancels the
    /// event.
    ///
    /// # Errors
    ///
    /// `PartialBatchFailure` listing the tickets whose refund failed (local
    /// state untouched; re-running is safe), `InvalidState` for an event that
    /// is already cancelled.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_event(&self, event_id: EventId) -> AdmissionResult<CancellationReport> {
        let ledger = self.store.load(event_id).await?;
        if ledger.event().cancelled {
            return Err(AdmissionError::invalid_state("event is already cancelled"));
        }

        let sold: Vec<(TicketId, Option<Payment>)> = ledger
            .tickets()
            .iter()
            .filter(|ticket| ticket.status.holds_capacity())
            .map(|ticket| (ticket.id, ledger.payment(ticket.payment_id).cloned()))
            .collect();

        let refunds = futures::future::join_all(sold.iter().map(|(ticket_id, payment)| async move {
            let result = match payment {
                Some(payment) => self.refund_payment(payment).await,
                None => Err(AdmissionError::not_found("payment", ticket_id)),
            };
            (*ticket_id, result)
        }))
        .await;

        let mut refunded = Vec::with_capacity(refunds.len());
        let mut failed = Vec::new();
        for (ticket_id, result) in refunds {
            match result {
                Ok(refund_id) => {
                    tracing::debug!(%ticket_id, %refund_id, "Ticket refunded");
                    refunded.push(ticket_id);
                }
                Err(error) => {
                    tracing::error!(%ticket_id, %error, "Refund failed");
                    metrics::counter!("admission_refunds_failed_total").increment(1);
                    failed.push(ticket_id);
                }
            }
        }

        if !failed.is_empty() {
            return Err(AdmissionError::PartialBatchFailure {
                failed_tickets: failed,
            });
        }

        self.dispatch(
            event_id,
            AdmissionCommand::CompleteCancellation {
                refunded: refunded.clone(),
            },
        )
        .await?;

        tracing::info!(refunded = refunded.len(), "Event cancelled");
        Ok(CancellationReport {
            event_id,
            refunded_tickets: refunded,
        })
    }
}

#[async_trait]
impl ExpirationHandler for AdmissionService {
    async fn handle_expiration(&self, job: &ExpirationJob) -> AdmissionResult<()> {
        self.expire_offer(job.event_id, job.entry_id).await.map(|_| ())
    }
}
