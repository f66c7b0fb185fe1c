//! Payment gateway abstraction.
//!
//! Abstraction over hosted-checkout processors (Stripe Checkout and similar).
//! The engine never captures money itself; it opens a checkout session,
//! receives a signed completion notification and asks for refunds.

use crate::types::{EntryId, EventId, PaymentId, SessionRef, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Boxed future returned by gateway calls
pub type GatewayFuture<T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send>>;

/// Payment gateway error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Request did not complete in time
    #[error("gateway timeout")]
    Timeout,
    /// Gateway answered with a server error or could not be reached
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    /// Gateway refused the request (bad parameters, declined, unknown object)
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    /// Gateway answered with something we could not understand
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Only transient failures are worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

/// Metadata attached to every checkout session.
///
/// Echoed back by the completion notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    /// Event being purchased
    pub event_id: EventId,
    /// Buyer
    pub user_id: UserId,
    /// Offer being consumed
    pub waiting_list_entry_id: Option<EntryId>,
}

/// Parameters for a hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    /// Local payment record the session belongs to
    pub payment_id: PaymentId,
    /// Price in minor currency units
    pub amount_cents: u64,
    /// Gateway-side expiry, aligned with the offer deadline
    pub expires_at: DateTime<Utc>,
    /// Echoed metadata
    pub metadata: CheckoutMetadata,
    /// Redirect after a successful payment
    pub success_url: String,
    /// Redirect after the buyer abandons checkout
    pub cancel_url: String,
}

/// A created checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Gateway session identifier
    pub session_ref: SessionRef,
    /// Hosted page the buyer is redirected to
    pub url: String,
}

/// A refund request for one payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    /// Gateway payment intent to refund in full
    pub payment_intent: String,
    /// Stable key so repeated requests refund at most once
    pub idempotency_key: String,
}

/// Payment gateway trait
///
/// Returns boxed futures so the trait stays dyn-compatible and can be injected
/// as `Arc<dyn PaymentGateway>`.
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted checkout session
    ///
    /// # Errors
    ///
    /// Returns error if the gateway refuses or cannot be reached
    fn create_checkout_session(&self, request: CheckoutSessionRequest) -> GatewayFuture<CheckoutSession>;

    /// Look up the payment intent behind a completed checkout session
    ///
    /// # Errors
    ///
    /// Returns error if the session is unknown or has no payment intent
    fn retrieve_payment_intent(&self, session_ref: &SessionRef) -> GatewayFuture<String>;

    /// Refund a payment intent in full, returning the gateway refund id
    ///
    /// # Errors
    ///
    /// Returns error if the refund fails
    fn refund(&self, request: RefundRequest) -> GatewayFuture<String>;
}
