//! Domain types for the waiting-list admission engine.
//!
//! Identifiers, entities and their status enums. The entities carry their own
//! transition rules so that an illegal move (for example re-offering an entry
//! that already expired) is rejected no matter which component attempts it.

use crate::error::AdmissionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing `Uuid`
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner `Uuid`
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a ticketed event (owned by the catalog)
    EventId
);
uuid_id!(
    /// Identifier of a verified user
    UserId
);
uuid_id!(
    /// Identifier of a waiting-list entry
    EntryId
);
uuid_id!(
    /// Identifier of a payment record
    PaymentId
);
uuid_id!(
    /// Identifier of an issued ticket
    TicketId
);

/// Reference to a checkout session held by the external payment gateway.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionRef(String);

impl SessionRef {
    /// Wraps a gateway session identifier
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw session identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Event (catalog view)
// ============================================================================

/// The slice of a catalog event the admission engine cares about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    /// Event identifier
    pub id: EventId,
    /// Sellable capacity
    pub total_tickets: u32,
    /// Ticket price in minor currency units
    pub price_cents: u64,
    /// Set once the cancellation batch has refunded every ticket
    pub cancelled: bool,
}

impl EventInfo {
    /// Creates an open (not cancelled) free event with the given capacity
    #[must_use]
    pub const fn new(id: EventId, total_tickets: u32) -> Self {
        Self {
            id,
            total_tickets,
            price_cents: 0,
            cancelled: false,
        }
    }

    /// Sets the ticket price
    #[must_use]
    pub const fn with_price(mut self, price_cents: u64) -> Self {
        self.price_cents = price_cents;
        self
    }
}

// ============================================================================
// Waiting list
// ============================================================================

/// Lifecycle of a waiting-list entry.
///
/// ```text
/// waiting -> offered -> purchased
///               \----> expired
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitingListStatus {
    /// In line, no offer yet
    Waiting,
    /// Holding a time-limited purchase offer
    Offered,
    /// Offer converted into a ticket
    Purchased,
    /// Offer timed out or was released
    Expired,
}

impl WaitingListStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Offered => "offered",
            Self::Purchased => "purchased",
            Self::Expired => "expired",
        }
    }

    /// Parse status from its database string.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Storage`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, AdmissionError> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "offered" => Ok(Self::Offered),
            "purchased" => Ok(Self::Purchased),
            "expired" => Ok(Self::Expired),
            _ => Err(AdmissionError::Storage(format!(
                "invalid waiting list status: {s}"
            ))),
        }
    }

    /// `purchased` and `expired` never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Purchased | Self::Expired)
    }

    /// Entries in these states hold a place in line.
    #[must_use]
    pub const fn counts_toward_rank(&self) -> bool {
        matches!(self, Self::Waiting | Self::Offered)
    }

    /// Whether `self -> next` is an edge of the state machine.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Offered)
                | (Self::Offered, Self::Expired)
                | (Self::Offered, Self::Purchased)
        )
    }
}

impl fmt::Display for WaitingListStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's place in line for one event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingListEntry {
    /// Entry identifier
    pub id: EntryId,
    /// Event the user is queueing for
    pub event_id: EventId,
    /// Queued user
    pub user_id: UserId,
    /// Current lifecycle state
    pub status: WaitingListStatus,
    /// Deadline of the current offer (only while offered, kept afterwards for audit)
    pub offer_expires_at: Option<DateTime<Utc>>,
    /// When the user joined
    pub joined_at: DateTime<Utc>,
    /// Strictly increasing FIFO key, unique across all entries
    pub seq: i64,
}

impl WaitingListEntry {
    /// Creates a fresh `waiting` entry.
    #[must_use]
    pub const fn new(
        id: EntryId,
        event_id: EventId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
        seq: i64,
    ) -> Self {
        Self {
            id,
            event_id,
            user_id,
            status: WaitingListStatus::Waiting,
            offer_expires_at: None,
            joined_at,
            seq,
        }
    }

    /// An offer that has not reached its deadline yet.
    #[must_use]
    pub fn is_active_offer(&self, now: DateTime<Utc>) -> bool {
        self.status == WaitingListStatus::Offered
            && self.offer_expires_at.is_some_and(|expires_at| expires_at > now)
    }

    fn transition(&mut self, next: WaitingListStatus) -> Result<(), AdmissionError> {
        if !self.status.can_transition_to(next) {
            return Err(AdmissionError::InvalidState(format!(
                "waiting list entry {} cannot move from {} to {next}",
                self.id, self.status
            )));
        }
        self.status = next;
        Ok(())
    }

    /// `waiting -> offered` with the given deadline.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidState`] unless the entry is waiting.
    pub fn offer(&mut self, expires_at: DateTime<Utc>) -> Result<(), AdmissionError> {
        self.transition(WaitingListStatus::Offered)?;
        self.offer_expires_at = Some(expires_at);
        Ok(())
    }

    /// `offered -> expired` (timeout or voluntary release).
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidState`] unless the entry is offered.
    pub fn expire(&mut self) -> Result<(), AdmissionError> {
        self.transition(WaitingListStatus::Expired)
    }

    /// `offered -> purchased`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidState`] unless the entry is offered.
    pub fn purchase(&mut self) -> Result<(), AdmissionError> {
        self.transition(WaitingListStatus::Purchased)
    }
}

/// Rank of a user's entry within the event's line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePosition {
    /// The caller's non-expired entry
    pub entry: WaitingListEntry,
    /// 1-based rank among waiting/offered entries
    pub position: u32,
}

// ============================================================================
// Payments and tickets
// ============================================================================

/// Status of a payment record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Checkout started, no confirmation yet
    Pending,
    /// Confirmation applied, ticket issued
    Fulfilled,
    /// Money returned to the buyer
    Refunded,
    /// Abandoned before confirmation
    Cancelled,
}

impl PaymentStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fulfilled => "fulfilled",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from its database string.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Storage`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, AdmissionError> {
        match s {
            "pending" => Ok(Self::Pending),
            "fulfilled" => Ok(Self::Fulfilled),
            "refunded" => Ok(Self::Refunded),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(AdmissionError::Storage(format!("invalid payment status: {s}"))),
        }
    }

    /// A confirmation was already applied to this payment at some point.
    #[must_use]
    pub const fn was_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled | Self::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checkout attempt for one ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment identifier
    pub id: PaymentId,
    /// Event being paid for
    pub event_id: EventId,
    /// Buyer
    pub user_id: UserId,
    /// Offer the checkout was started from
    pub entry_id: Option<EntryId>,
    /// Gateway checkout session, attached once the gateway answered
    pub session_ref: Option<SessionRef>,
    /// Gateway payment intent, needed for refunds
    pub payment_intent: Option<String>,
    /// Current status
    pub status: PaymentStatus,
    /// When checkout began
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a `pending` payment without a gateway session.
    #[must_use]
    pub const fn pending(
        id: PaymentId,
        event_id: EventId,
        user_id: UserId,
        entry_id: Option<EntryId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id,
            user_id,
            entry_id,
            session_ref: None,
            payment_intent: None,
            status: PaymentStatus::Pending,
            created_at,
        }
    }

    /// `pending -> fulfilled`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidState`] unless the payment is pending.
    pub fn fulfill(&mut self, payment_intent: Option<String>) -> Result<(), AdmissionError> {
        if self.status != PaymentStatus::Pending {
            return Err(AdmissionError::InvalidState(format!(
                "payment {} is {} and cannot be fulfilled",
                self.id, self.status
            )));
        }
        self.status = PaymentStatus::Fulfilled;
        if payment_intent.is_some() {
            self.payment_intent = payment_intent;
        }
        Ok(())
    }

    /// `pending -> cancelled`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidState`] unless the payment is pending.
    pub fn cancel(&mut self) -> Result<(), AdmissionError> {
        if self.status != PaymentStatus::Pending {
            return Err(AdmissionError::InvalidState(format!(
                "payment {} is {} and cannot be cancelled",
                self.id, self.status
            )));
        }
        self.status = PaymentStatus::Cancelled;
        Ok(())
    }

    /// `fulfilled -> refunded`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidState`] unless the payment is fulfilled.
    pub fn refund(&mut self) -> Result<(), AdmissionError> {
        if self.status != PaymentStatus::Fulfilled {
            return Err(AdmissionError::InvalidState(format!(
                "payment {} is {} and cannot be refunded",
                self.id, self.status
            )));
        }
        self.status = PaymentStatus::Refunded;
        Ok(())
    }
}

/// Status of an issued ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Issued and not yet scanned
    Valid,
    /// Scanned at the door
    Used,
    /// Refunded
    Refunded,
    /// Voided without refund
    Cancelled,
}

impl TicketStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Used => "used",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from its database string.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Storage`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, AdmissionError> {
        match s {
            "valid" => Ok(Self::Valid),
            "used" => Ok(Self::Used),
            "refunded" => Ok(Self::Refunded),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(AdmissionError::Storage(format!("invalid ticket status: {s}"))),
        }
    }

    /// Tickets in these states consume capacity.
    #[must_use]
    pub const fn holds_capacity(&self) -> bool {
        matches!(self, Self::Valid | Self::Used)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sold ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Event the ticket admits to
    pub event_id: EventId,
    /// Owner
    pub user_id: UserId,
    /// Payment that produced this ticket
    pub payment_id: PaymentId,
    /// Current status
    pub status: TicketStatus,
    /// When the payment was fulfilled
    pub purchased_at: DateTime<Utc>,
}

// ============================================================================
// Scheduling
// ============================================================================

/// A persisted deadline for one offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationJob {
    /// Offer being timed
    pub entry_id: EntryId,
    /// Event the offer belongs to
    pub event_id: EventId,
    /// Exactly the offer's `offer_expires_at`
    pub fire_at: DateTime<Utc>,
}
