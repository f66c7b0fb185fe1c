//! Error taxonomy of the admission engine.

use crate::gateway::GatewayError;
use crate::types::TicketId;
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the admission crates.
pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// Errors surfaced by admission operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Referenced entity does not exist. Not retryable.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of entity ("event", "waiting list entry", ...)
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// The operation is not allowed in the entity's current state.
    #[error("{0}")]
    InvalidState(String),

    /// The caller could not be identified.
    #[error("authentication required")]
    Unauthenticated,

    /// Too many joins inside the current window.
    #[error("you've joined the waiting list too many times, please wait {} minutes before trying again", retry_after.as_secs().div_ceil(60))]
    RateLimited {
        /// Time until the window resets
        retry_after: Duration,
    },

    /// The payment gateway failed after retries were exhausted.
    #[error("payment gateway error: {0}")]
    ExternalService(#[from] GatewayError),

    /// Some refunds of a cancellation batch failed; nothing was committed locally.
    #[error("failed to refund {} ticket(s)", failed_tickets.len())]
    PartialBatchFailure {
        /// Tickets whose refund failed
        failed_tickets: Vec<TicketId>,
    },

    /// The store could not read or write.
    #[error("storage error: {0}")]
    Storage(String),
}

impl AdmissionError {
    /// Shorthand for [`AdmissionError::NotFound`].
    pub fn not_found(resource: &'static str, id: impl Display) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`AdmissionError::InvalidState`].
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Shorthand for [`AdmissionError::Storage`].
    pub fn storage(error: impl Display) -> Self {
        Self::Storage(error.to_string())
    }
}
