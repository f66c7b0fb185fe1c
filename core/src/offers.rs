//! Offer issuance.
//!
//! Drains the waiting list into time-limited offers whenever capacity may have
//! freed up. Selection and application are split so the reducer can turn each
//! promotion into an event before it touches the ledger.

use crate::ledger::EventLedger;
use crate::types::EntryId;
use chrono::{DateTime, Utc};

/// Picks the entries to promote.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfferIssuer;

impl OfferIssuer {
    /// Oldest waiting entries that fit into the capacity available at `now`.
    ///
    /// The batch size is fixed here, before any promotion is applied, so a
    /// run never double counts. Cancelled events never issue offers.
    #[must_use]
    pub fn select(ledger: &EventLedger, now: DateTime<Utc>) -> Vec<EntryId> {
        if ledger.event().cancelled {
            return Vec::new();
        }

        let snapshot = ledger.capacity(now);
        if snapshot.is_sold_out() {
            return Vec::new();
        }

        ledger.oldest_waiting(snapshot.offerable())
    }
}
