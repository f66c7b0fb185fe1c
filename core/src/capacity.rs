//! Capacity accounting.
//!
//! One shared computation used both by the offer issuer and by the public
//! availability query, so the two can never disagree.

use crate::types::{Ticket, WaitingListEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time capacity figures for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    /// Sellable capacity
    pub total_tickets: u32,
    /// Tickets in `valid` or `used`
    pub purchased: u32,
    /// Offers whose deadline is still in the future
    pub active_offers: u32,
    /// `total - (purchased + active_offers)`; negative when a late payment oversold
    pub available: i64,
}

impl CapacitySnapshot {
    /// No spot can be offered right now.
    #[must_use]
    pub const fn is_sold_out(&self) -> bool {
        self.available <= 0
    }

    /// Number of new offers that may be issued (zero when oversold).
    #[must_use]
    pub fn offerable(&self) -> usize {
        usize::try_from(self.available.max(0)).unwrap_or(usize::MAX)
    }
}

/// Computes remaining sellable spots. Side-effect free.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapacityAccountant;

impl CapacityAccountant {
    /// Computes the snapshot from an event's tickets and waiting-list entries.
    #[must_use]
    pub fn compute<'a>(
        total_tickets: u32,
        tickets: impl IntoIterator<Item = &'a Ticket>,
        entries: impl IntoIterator<Item = &'a WaitingListEntry>,
        now: DateTime<Utc>,
    ) -> CapacitySnapshot {
        let purchased = count(tickets.into_iter().filter(|t| t.status.holds_capacity()));
        let active_offers = count(entries.into_iter().filter(|e| e.is_active_offer(now)));

        CapacitySnapshot {
            total_tickets,
            purchased,
            active_offers,
            available: i64::from(total_tickets) - i64::from(purchased) - i64::from(active_offers),
        }
    }
}

fn count<T>(iter: impl Iterator<Item = T>) -> u32 {
    u32::try_from(iter.count()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        EntryId, EventId, PaymentId, TicketId, TicketStatus, UserId, WaitingListEntry,
    };
    use chrono::Duration;

    fn ticket(event_id: EventId, status: TicketStatus) -> Ticket {
        Ticket {
            id: TicketId::new(),
            event_id,
            user_id: UserId::new(),
            payment_id: PaymentId::new(),
            status,
            purchased_at: Utc::now(),
        }
    }

    fn offer(event_id: EventId, expires_at: DateTime<Utc>, seq: i64) -> WaitingListEntry {
        let mut entry =
            WaitingListEntry::new(EntryId::new(), event_id, UserId::new(), Utc::now(), seq);
        entry.status = crate::types::WaitingListStatus::Offered;
        entry.offer_expires_at = Some(expires_at);
        entry
    }

    #[test]
    fn counts_only_capacity_holding_tickets_and_live_offers() {
        let event_id = EventId::new();
        let now = Utc::now();
        let tickets = vec![
            ticket(event_id, TicketStatus::Valid),
            ticket(event_id, TicketStatus::Used),
            ticket(event_id, TicketStatus::Refunded),
        ];
        let entries = vec![
            offer(event_id, now + Duration::minutes(5), 1),
            offer(event_id, now - Duration::minutes(5), 2),
            offer(event_id, now, 3),
        ];

        let snapshot = CapacityAccountant::compute(5, &tickets, &entries, now);

        assert_eq!(snapshot.purchased, 2);
        assert_eq!(snapshot.active_offers, 1);
        assert_eq!(snapshot.available, 2);
        assert_eq!(snapshot.offerable(), 2);
        assert!(!snapshot.is_sold_out());
    }

    #[test]
    fn oversold_is_negative_and_offers_nothing() {
        let event_id = EventId::new();
        let tickets = vec![
            ticket(event_id, TicketStatus::Valid),
            ticket(event_id, TicketStatus::Valid),
        ];

        let snapshot = CapacityAccountant::compute(1, &tickets, std::iter::empty(), Utc::now());

        assert_eq!(snapshot.available, -1);
        assert_eq!(snapshot.offerable(), 0);
        assert!(snapshot.is_sold_out());
    }
}
