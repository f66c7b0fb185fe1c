//! Inbound payment notifications.
//!
//! The provider signs every delivery with HMAC-SHA256 over
//! `"{timestamp}.{payload}"` and sends `t=<unix>,v1=<hex>[,v1=<hex>...]` in the
//! signature header. Verification happens on the raw body before anything is
//! parsed, so a forged notification never reaches the coordinator.

use admission_core::types::SessionRef;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Why a delivery was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// No signing secret is configured
    #[error("webhook signing secret not configured")]
    NotConfigured,
    /// Header missing
    #[error("missing signature header")]
    MissingHeader,
    /// Header present but not `t=..,v1=..`
    #[error("malformed signature header")]
    Malformed,
    /// Timestamp outside the tolerance window
    #[error("signature timestamp outside tolerance")]
    Expired,
    /// No `v1` signature matched
    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies signed deliveries.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<Vec<u8>>,
    tolerance_seconds: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("configured", &self.secret.is_some())
            .field("tolerance_seconds", &self.tolerance_seconds)
            .finish()
    }
}

impl WebhookVerifier {
    /// Verifier for `secret`; `None` rejects everything.
    #[must_use]
    pub fn new(secret: Option<String>, tolerance_seconds: i64) -> Self {
        Self {
            secret: secret.map(String::into_bytes),
            tolerance_seconds,
        }
    }

    /// Whether a signing secret is set.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Checks `header` against `payload` at time `now`.
    ///
    /// # Errors
    ///
    /// Returns why the delivery must be refused.
    pub fn verify(
        &self,
        header: Option<&str>,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let secret = self.secret.as_deref().ok_or(SignatureError::NotConfigured)?;
        let header = header.ok_or(SignatureError::MissingHeader)?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?);
                }
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed);
        }

        if (now.timestamp() - timestamp).abs() > self.tolerance_seconds {
            return Err(SignatureError::Expired);
        }

        let matched = signatures.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
                return false;
            };
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            mac.verify_slice(&expected).is_ok()
        });

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

/// Computes the header value for `payload`, the way the provider does.
#[must_use]
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let digest = HmacSha256::new_from_slice(secret.as_bytes()).map_or_else(
        |_| String::new(),
        |mut mac| {
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        },
    );
    format!("t={timestamp},v1={digest}")
}

// ============================================================================
// Payload
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    payment_intent: Option<IntentRef>,
    #[serde(default)]
    metadata: NotificationMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntentRef {
    Id(String),
    Expanded { id: String },
}

#[derive(Debug, Deserialize)]
struct AccountObject {
    id: String,
    #[serde(default)]
    charges_enabled: bool,
}

/// Metadata echoed from the checkout session. Informational only; the
/// coordinator trusts its own payment record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationMetadata {
    /// Event the session was opened for
    #[serde(default)]
    pub event_id: Option<String>,
    /// Buyer
    #[serde(default)]
    pub user_id: Option<String>,
    /// Offer the session consumed
    #[serde(default)]
    pub waiting_list_entry_id: Option<String>,
}

/// A verified notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// `checkout.session.completed`
    CheckoutCompleted {
        /// Provider session
        session_ref: SessionRef,
        /// Provider payment intent, when present
        payment_intent: Option<String>,
        /// Echoed metadata
        metadata: NotificationMetadata,
    },
    /// `account.updated`
    AccountUpdated {
        /// Merchant account
        account_id: String,
        /// Whether the account can take charges
        charges_enabled: bool,
    },
    /// Anything else; acknowledged and ignored
    Other(String),
}

impl Notification {
    /// Parses a verified payload.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for a malformed body.
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_slice(payload)?;
        match envelope.kind.as_str() {
            "checkout.session.completed" => {
                let session: SessionObject = serde_json::from_value(envelope.data.object)?;
                Ok(Self::CheckoutCompleted {
                    session_ref: SessionRef::new(session.id),
                    payment_intent: session.payment_intent.map(|intent| match intent {
                        IntentRef::Id(id) | IntentRef::Expanded { id } => id,
                    }),
                    metadata: session.metadata,
                })
            }
            "account.updated" => {
                let account: AccountObject = serde_json::from_value(envelope.data.object)?;
                Ok(Self::AccountUpdated {
                    account_id: account.id,
                    charges_enabled: account.charges_enabled,
                })
            }
            _ => Ok(Self::Other(envelope.kind)),
        }
    }

    /// Provider event type.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::CheckoutCompleted { .. } => "checkout.session.completed",
            Self::AccountUpdated { .. } => "account.updated",
            Self::Other(kind) => kind,
        }
    }
}
