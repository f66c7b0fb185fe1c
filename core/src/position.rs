//! Queue position projection.

use crate::types::{QueuePosition, UserId, WaitingListEntry, WaitingListStatus};

/// Read-only rank lookup over one event's entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueuePositionResolver;

impl QueuePositionResolver {
    /// Finds the user's non-expired entry and its 1-based rank.
    ///
    /// Rank counts `waiting` and `offered` entries with a smaller `seq`, so a
    /// user holding an offer or a purchase still sees where they stood.
    /// Returns `None` when the user is not in line.
    #[must_use]
    pub fn resolve(entries: &[WaitingListEntry], user_id: UserId) -> Option<QueuePosition> {
        let entry = entries
            .iter()
            .filter(|entry| entry.user_id == user_id && entry.status != WaitingListStatus::Expired)
            .max_by_key(|entry| entry.seq)?;

        let ahead = entries
            .iter()
            .filter(|other| other.seq < entry.seq && other.status.counts_toward_rank())
            .count();

        Some(QueuePosition {
            entry: entry.clone(),
            position: u32::try_from(ahead).map_or(u32::MAX, |ahead| ahead.saturating_add(1)),
        })
    }
}
