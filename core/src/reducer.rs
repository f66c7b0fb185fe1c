//! Admission reducer: the functional core of the engine.
//!
//! `(ledger, command, environment) -> facts`. Every command is validated
//! against the ledger, turned into one or more [`AdmissionEvent`]s and each
//! event is applied back onto the ledger. Commands that can free capacity
//! (join, release, expiration, fulfillment, capacity update) end with an
//! offer-issuing pass, so the queue is backfilled in the same unit of work
//! that freed the spot.

use crate::environment::Clock;
use crate::error::{AdmissionError, AdmissionResult};
use crate::ledger::EventLedger;
use crate::offers::OfferIssuer;
use crate::types::{
    EntryId, ExpirationJob, Payment, PaymentId, PaymentStatus, SessionRef, Ticket, TicketId,
    TicketStatus, UserId, WaitingListEntry, WaitingListStatus,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// The Reducer trait - core abstraction for business logic
///
/// A reducer validates a command against the current state, mutates the state
/// in place and returns the facts it applied. It performs no I/O; the runtime
/// decides how state is loaded and persisted.
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// The command type this reducer processes
    type Command;

    /// The facts emitted by this reducer
    type Event;

    /// The environment type with injected dependencies
    type Environment;

    /// The error returned when a command is rejected
    type Error;

    /// Reduce a command into state changes
    ///
    /// # Errors
    ///
    /// Returns an error when the command is not valid for the current state.
    /// The state may have been partially mutated; callers must discard it.
    fn reduce(
        &self,
        state: &mut Self::State,
        command: Self::Command,
        env: &Self::Environment,
    ) -> Result<SmallVec<[Self::Event; 4]>, Self::Error>;
}

// ============================================================================
// Commands and events
// ============================================================================

/// Inputs to the admission reducer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionCommand {
    /// Put a user in line
    Join {
        /// New entry id
        entry_id: EntryId,
        /// Joining user
        user_id: UserId,
        /// FIFO key handed out by the store
        seq: i64,
    },
    /// Change the sellable capacity or price of a registered event
    UpdateEvent {
        /// New capacity
        total_tickets: u32,
        /// New price in minor currency units
        price_cents: u64,
    },
    /// Promote waiting entries into the free capacity
    IssueOffers,
    /// An expiration job fired
    ExpireOffer {
        /// Entry whose deadline passed
        entry_id: EntryId,
    },
    /// The holder gives an offer back
    ReleaseOffer {
        /// Offered entry
        entry_id: EntryId,
        /// Caller, must own the entry
        user_id: UserId,
    },
    /// Create a pending payment for the caller's live offer
    BeginCheckout {
        /// New payment id
        payment_id: PaymentId,
        /// Buyer
        user_id: UserId,
    },
    /// Record the gateway session created for a pending payment
    AttachSession {
        /// Pending payment
        payment_id: PaymentId,
        /// Gateway session
        session_ref: SessionRef,
    },
    /// Apply a payment confirmation
    Fulfill {
        /// Payment being confirmed
        payment_id: PaymentId,
        /// Ticket id to issue
        ticket_id: TicketId,
        /// Gateway payment intent, when the notification carried one
        payment_intent: Option<String>,
    },
    /// All refunds succeeded; flip local state
    CompleteCancellation {
        /// Tickets refunded at the gateway
        refunded: Vec<TicketId>,
    },
}

/// Facts applied by the admission reducer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionEvent {
    /// Capacity or price changed
    EventUpdated {
        /// New capacity
        total_tickets: u32,
        /// New price
        price_cents: u64,
    },
    /// A user joined the line
    Joined {
        /// New entry
        entry_id: EntryId,
        /// Joining user
        user_id: UserId,
        /// FIFO key
        seq: i64,
        /// Join time
        joined_at: DateTime<Utc>,
    },
    /// A waiting entry received an offer
    OfferIssued {
        /// Promoted entry
        entry_id: EntryId,
        /// Offer holder
        user_id: UserId,
        /// Offer deadline, also the expiration job's fire time
        expires_at: DateTime<Utc>,
    },
    /// An offer timed out
    OfferExpired {
        /// Expired entry
        entry_id: EntryId,
    },
    /// An expiration job fired for an entry that is no longer offered
    ExpirationSkipped {
        /// Entry the job was for
        entry_id: EntryId,
        /// The entry's status at fire time, `None` if unknown
        status: Option<WaitingListStatus>,
    },
    /// The holder released an offer
    OfferReleased {
        /// Released entry
        entry_id: EntryId,
        /// Former holder
        user_id: UserId,
    },
    /// A pending payment was created
    CheckoutStarted {
        /// New payment
        payment_id: PaymentId,
        /// Buyer
        user_id: UserId,
        /// Offer being paid for
        entry_id: EntryId,
        /// Offer deadline, used as the gateway session expiry
        offer_expires_at: DateTime<Utc>,
        /// Creation time
        started_at: DateTime<Utc>,
    },
    /// The gateway session was recorded
    SessionAttached {
        /// Pending payment
        payment_id: PaymentId,
        /// Gateway session
        session_ref: SessionRef,
    },
    /// A payment was confirmed and a ticket issued
    PaymentFulfilled {
        /// Confirmed payment
        payment_id: PaymentId,
        /// Issued ticket
        ticket_id: TicketId,
        /// Ticket owner
        user_id: UserId,
        /// Gateway payment intent
        payment_intent: Option<String>,
        /// Confirmation time
        fulfilled_at: DateTime<Utc>,
    },
    /// A confirmation arrived for a cancelled payment; no ticket, money goes back
    PaymentVoided {
        /// Cancelled payment
        payment_id: PaymentId,
        /// Gateway payment intent to refund, when known
        payment_intent: Option<String>,
    },
    /// A duplicate confirmation was ignored
    FulfillmentSkipped {
        /// Payment that was already fulfilled
        payment_id: PaymentId,
    },
    /// An offer was consumed by a payment
    EntryPurchased {
        /// Purchased entry
        entry_id: EntryId,
    },
    /// A late payment pushed sales over capacity
    CapacityExceeded {
        /// Signed remaining capacity after the sale
        available: i64,
    },
    /// Every ticket was refunded and the event cancelled
    EventCancelled {
        /// Tickets flipped to `refunded`
        refunded: Vec<TicketId>,
        /// Pending payments flipped to `cancelled`
        voided: Vec<PaymentId>,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies injected into the admission reducer.
#[derive(Clone)]
pub struct AdmissionEnvironment {
    /// Clock for timestamps and deadlines
    pub clock: Arc<dyn Clock>,
    /// Lifetime of an offer
    pub offer_ttl: Duration,
}

impl AdmissionEnvironment {
    /// Default offer lifetime (30 minutes)
    pub const DEFAULT_OFFER_TTL_SECONDS: i64 = 30 * 60;

    /// Creates a new environment
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, offer_ttl: Duration) -> Self {
        Self { clock, offer_ttl }
    }
}

impl std::fmt::Debug for AdmissionEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionEnvironment")
            .field("offer_ttl", &self.offer_ttl)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Reducer
// ============================================================================

type Events = SmallVec<[AdmissionEvent; 4]>;

const NO_VALID_OFFER: &str = "no valid ticket offer found";

/// Reducer for one event's waiting list, payments and tickets.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionReducer;

impl AdmissionReducer {
    /// Creates a new reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    // ========== Validation ==========

    fn validate_open(ledger: &EventLedger) -> AdmissionResult<()> {
        if ledger.event().cancelled {
            return Err(AdmissionError::invalid_state("event has been cancelled"));
        }
        Ok(())
    }

    /// Checks that `user_id` may join this event's waiting list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the event is cancelled or the user already
    /// holds a non-expired entry.
    pub fn validate_join(ledger: &EventLedger, user_id: UserId) -> AdmissionResult<()> {
        Self::validate_open(ledger)?;
        if ledger.active_entry_for(user_id).is_some() {
            return Err(AdmissionError::invalid_state(
                "already in the waiting list for this event",
            ));
        }
        Ok(())
    }

    fn validate_capacity(
        ledger: &EventLedger,
        total_tickets: u32,
        now: DateTime<Utc>,
    ) -> AdmissionResult<()> {
        Self::validate_open(ledger)?;
        let current = ledger.capacity(now);
        if current.purchased > 0 && total_tickets != current.total_tickets {
            return Err(AdmissionError::invalid_state(
                "capacity cannot change once tickets are sold",
            ));
        }
        let held = u64::from(current.purchased) + u64::from(current.active_offers);
        if u64::from(total_tickets) < held {
            return Err(AdmissionError::invalid_state(format!(
                "capacity {total_tickets} is below the {held} spots already sold or offered"
            )));
        }
        Ok(())
    }

    fn validate_release(
        ledger: &EventLedger,
        entry_id: EntryId,
        user_id: UserId,
    ) -> AdmissionResult<()> {
        let entry = ledger
            .entry(entry_id)
            .ok_or_else(|| AdmissionError::not_found("waiting list entry", entry_id))?;
        if entry.user_id != user_id || entry.status != WaitingListStatus::Offered {
            return Err(AdmissionError::invalid_state(NO_VALID_OFFER));
        }
        Ok(())
    }

    fn validate_checkout(
        ledger: &EventLedger,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> AdmissionResult<(EntryId, DateTime<Utc>)> {
        Self::validate_open(ledger)?;
        ledger
            .offered_entry_for(user_id)
            .filter(|entry| entry.is_active_offer(now))
            .and_then(|entry| entry.offer_expires_at.map(|expires_at| (entry.id, expires_at)))
            .ok_or_else(|| AdmissionError::invalid_state(NO_VALID_OFFER))
    }

    // ========== Offer issuing ==========

    fn issue_offers(
        ledger: &mut EventLedger,
        env: &AdmissionEnvironment,
        events: &mut Events,
    ) -> AdmissionResult<()> {
        let now = env.clock.now();
        let expires_at = now + env.offer_ttl;

        for entry_id in OfferIssuer::select(ledger, now) {
            let user_id = ledger
                .entry(entry_id)
                .map(|entry| entry.user_id)
                .ok_or_else(|| AdmissionError::not_found("waiting list entry", entry_id))?;
            Self::emit(
                ledger,
                events,
                AdmissionEvent::OfferIssued {
                    entry_id,
                    user_id,
                    expires_at,
                },
            )?;
        }
        Ok(())
    }

    fn emit(
        ledger: &mut EventLedger,
        events: &mut Events,
        event: AdmissionEvent,
    ) -> AdmissionResult<()> {
        Self::apply_event(ledger, &event)?;
        events.push(event);
        Ok(())
    }

    // ========== Event application ==========

    fn entry_mut(
        ledger: &mut EventLedger,
        entry_id: EntryId,
    ) -> AdmissionResult<&mut WaitingListEntry> {
        ledger
            .entry_mut(entry_id)
            .ok_or_else(|| AdmissionError::not_found("waiting list entry", entry_id))
    }

    fn payment_mut(ledger: &mut EventLedger, payment_id: PaymentId) -> AdmissionResult<&mut Payment> {
        ledger
            .payment_mut(payment_id)
            .ok_or_else(|| AdmissionError::not_found("payment", payment_id))
    }

    /// Applies a fact to the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the fact refers to a missing row or breaks a
    /// transition rule.
    pub fn apply_event(ledger: &mut EventLedger, event: &AdmissionEvent) -> AdmissionResult<()> {
        match event {
            AdmissionEvent::EventUpdated {
                total_tickets,
                price_cents,
            } => {
                ledger.set_capacity(*total_tickets, *price_cents);
            }

            AdmissionEvent::Joined {
                entry_id,
                user_id,
                seq,
                joined_at,
            } => {
                let event_id = ledger.event().id;
                ledger.insert_entry(WaitingListEntry::new(
                    *entry_id, event_id, *user_id, *joined_at, *seq,
                ));
            }

            AdmissionEvent::OfferIssued {
                entry_id,
                expires_at,
                ..
            } => {
                Self::entry_mut(ledger, *entry_id)?.offer(*expires_at)?;
                let event_id = ledger.event().id;
                ledger.schedule_expiration(ExpirationJob {
                    entry_id: *entry_id,
                    event_id,
                    fire_at: *expires_at,
                });
            }

            AdmissionEvent::OfferExpired { entry_id } => {
                Self::entry_mut(ledger, *entry_id)?.expire()?;
                ledger.complete_expiration(*entry_id);
            }

            AdmissionEvent::ExpirationSkipped { entry_id, .. } => {
                ledger.complete_expiration(*entry_id);
            }

            AdmissionEvent::OfferReleased { entry_id, .. } => {
                Self::entry_mut(ledger, *entry_id)?.expire()?;
            }

            AdmissionEvent::CheckoutStarted {
                payment_id,
                user_id,
                entry_id,
                started_at,
                ..
            } => {
                let event_id = ledger.event().id;
                ledger.insert_payment(Payment::pending(
                    *payment_id,
                    event_id,
                    *user_id,
                    Some(*entry_id),
                    *started_at,
                ));
            }

            AdmissionEvent::SessionAttached {
                payment_id,
                session_ref,
            } => {
                Self::payment_mut(ledger, *payment_id)?.session_ref = Some(session_ref.clone());
            }

            AdmissionEvent::PaymentFulfilled {
                payment_id,
                ticket_id,
                user_id,
                payment_intent,
                fulfilled_at,
            } => {
                Self::payment_mut(ledger, *payment_id)?.fulfill(payment_intent.clone())?;
                let event_id = ledger.event().id;
                ledger.insert_ticket(Ticket {
                    id: *ticket_id,
                    event_id,
                    user_id: *user_id,
                    payment_id: *payment_id,
                    status: TicketStatus::Valid,
                    purchased_at: *fulfilled_at,
                });
            }

            AdmissionEvent::PaymentVoided {
                payment_id,
                payment_intent,
            } => {
                let payment = Self::payment_mut(ledger, *payment_id)?;
                if payment.status == PaymentStatus::Pending {
                    payment.cancel()?;
                }
                if payment_intent.is_some() {
                    payment.payment_intent.clone_from(payment_intent);
                }
            }

            AdmissionEvent::EntryPurchased { entry_id } => {
                Self::entry_mut(ledger, *entry_id)?.purchase()?;
            }

            AdmissionEvent::EventCancelled { refunded, voided } => {
                for ticket_id in refunded {
                    let ticket = ledger
                        .ticket_mut(*ticket_id)
                        .ok_or_else(|| AdmissionError::not_found("ticket", ticket_id))?;
                    ticket.status = TicketStatus::Refunded;
                    let payment_id = ticket.payment_id;
                    let fulfilled = ledger
                        .payment(payment_id)
                        .is_some_and(|payment| payment.status == PaymentStatus::Fulfilled);
                    if fulfilled {
                        Self::payment_mut(ledger, payment_id)?.refund()?;
                    }
                }
                for payment_id in voided {
                    Self::payment_mut(ledger, *payment_id)?.cancel()?;
                }
                ledger.mark_cancelled();
            }

            // Informational facts don't modify state
            AdmissionEvent::FulfillmentSkipped { .. } | AdmissionEvent::CapacityExceeded { .. } => {}
        }
        Ok(())
    }
}

impl Reducer for AdmissionReducer {
    type State = EventLedger;
    type Command = AdmissionCommand;
    type Event = AdmissionEvent;
    type Environment = AdmissionEnvironment;
    type Error = AdmissionError;

    #[allow(clippy::too_many_lines)] // One arm per command
    fn reduce(
        &self,
        ledger: &mut EventLedger,
        command: AdmissionCommand,
        env: &AdmissionEnvironment,
    ) -> AdmissionResult<Events> {
        let mut events = Events::new();

        match command {
            AdmissionCommand::Join {
                entry_id,
                user_id,
                seq,
            } => {
                Self::validate_join(ledger, user_id)?;
                Self::emit(
                    ledger,
                    &mut events,
                    AdmissionEvent::Joined {
                        entry_id,
                        user_id,
                        seq,
                        joined_at: env.clock.now(),
                    },
                )?;
                Self::issue_offers(ledger, env, &mut events)?;
            }

            AdmissionCommand::UpdateEvent {
                total_tickets,
                price_cents,
            } => {
                Self::validate_capacity(ledger, total_tickets, env.clock.now())?;
                Self::emit(
                    ledger,
                    &mut events,
                    AdmissionEvent::EventUpdated {
                        total_tickets,
                        price_cents,
                    },
                )?;
                Self::issue_offers(ledger, env, &mut events)?;
            }

            AdmissionCommand::IssueOffers => {
                Self::issue_offers(ledger, env, &mut events)?;
            }

            AdmissionCommand::ExpireOffer { entry_id } => {
                let status = ledger.entry(entry_id).map(|entry| entry.status);
                if status != Some(WaitingListStatus::Offered) {
                    tracing::debug!(%entry_id, ?status, "Expiration fired for entry that is no longer offered");
                    Self::emit(
                        ledger,
                        &mut events,
                        AdmissionEvent::ExpirationSkipped { entry_id, status },
                    )?;
                    return Ok(events);
                }
                Self::emit(ledger, &mut events, AdmissionEvent::OfferExpired { entry_id })?;
                Self::issue_offers(ledger, env, &mut events)?;
            }

            AdmissionCommand::ReleaseOffer { entry_id, user_id } => {
                Self::validate_release(ledger, entry_id, user_id)?;
                Self::emit(
                    ledger,
                    &mut events,
                    AdmissionEvent::OfferReleased { entry_id, user_id },
                )?;
                Self::issue_offers(ledger, env, &mut events)?;
            }

            AdmissionCommand::BeginCheckout {
                payment_id,
                user_id,
            } => {
                let now = env.clock.now();
                let (entry_id, offer_expires_at) = Self::validate_checkout(ledger, user_id, now)?;
                Self::emit(
                    ledger,
                    &mut events,
                    AdmissionEvent::CheckoutStarted {
                        payment_id,
                        user_id,
                        entry_id,
                        offer_expires_at,
                        started_at: now,
                    },
                )?;
            }

            AdmissionCommand::AttachSession {
                payment_id,
                session_ref,
            } => {
                let payment = ledger
                    .payment(payment_id)
                    .ok_or_else(|| AdmissionError::not_found("payment", payment_id))?;
                if payment.status != PaymentStatus::Pending || payment.session_ref.is_some() {
                    return Err(AdmissionError::invalid_state(format!(
                        "payment {payment_id} cannot take a new checkout session"
                    )));
                }
                Self::emit(
                    ledger,
                    &mut events,
                    AdmissionEvent::SessionAttached {
                        payment_id,
                        session_ref,
                    },
                )?;
            }

            AdmissionCommand::Fulfill {
                payment_id,
                ticket_id,
                payment_intent,
            } => {
                let payment = ledger
                    .payment(payment_id)
                    .ok_or_else(|| AdmissionError::not_found("payment", payment_id))?;

                // Single idempotency gate
                if payment.status.was_fulfilled() {
                    return Ok(smallvec![AdmissionEvent::FulfillmentSkipped { payment_id }]);
                }
                // Money taken for a cancelled checkout is handed back, never ticketed
                if payment.status == PaymentStatus::Cancelled || ledger.event().cancelled {
                    let payment_intent = payment_intent.or_else(|| payment.payment_intent.clone());
                    Self::emit(
                        ledger,
                        &mut events,
                        AdmissionEvent::PaymentVoided {
                            payment_id,
                            payment_intent,
                        },
                    )?;
                    return Ok(events);
                }

                let user_id = payment.user_id;
                let consumed_entry = payment
                    .entry_id
                    .and_then(|id| ledger.entry(id))
                    .filter(|entry| entry.status == WaitingListStatus::Offered)
                    .or_else(|| ledger.offered_entry_for(user_id))
                    .map(|entry| entry.id);

                Self::emit(
                    ledger,
                    &mut events,
                    AdmissionEvent::PaymentFulfilled {
                        payment_id,
                        ticket_id,
                        user_id,
                        payment_intent,
                        fulfilled_at: env.clock.now(),
                    },
                )?;

                if let Some(entry_id) = consumed_entry {
                    Self::emit(ledger, &mut events, AdmissionEvent::EntryPurchased { entry_id })?;
                }

                let available = ledger.capacity(env.clock.now()).available;
                if available < 0 {
                    Self::emit(
                        ledger,
                        &mut events,
                        AdmissionEvent::CapacityExceeded { available },
                    )?;
                }

                Self::issue_offers(ledger, env, &mut events)?;
            }

            AdmissionCommand::CompleteCancellation { refunded } => {
                Self::validate_open(ledger)?;
                let outstanding: Vec<TicketId> = ledger
                    .tickets()
                    .iter()
                    .filter(|ticket| ticket.status.holds_capacity() && !refunded.contains(&ticket.id))
                    .map(|ticket| ticket.id)
                    .collect();
                if !outstanding.is_empty() {
                    return Err(AdmissionError::PartialBatchFailure {
                        failed_tickets: outstanding,
                    });
                }

                let refunded = ledger
                    .tickets()
                    .iter()
                    .filter(|ticket| ticket.status.holds_capacity())
                    .map(|ticket| ticket.id)
                    .collect();
                let voided = ledger.pending_payments();
                Self::emit(
                    ledger,
                    &mut events,
                    AdmissionEvent::EventCancelled { refunded, voided },
                )?;
            }
        }

        Ok(events)
    }
}
