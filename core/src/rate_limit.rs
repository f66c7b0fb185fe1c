//! Join rate limiting.
//!
//! Users may only join waiting lists a limited number of times per window,
//! which keeps a single account from churning through the queue.

use crate::error::AdmissionResult;
use crate::types::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Fixed-window limit: at most `max_attempts` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Attempts allowed per window
    pub max_attempts: u32,
    /// Window length
    pub window: Duration,
}

impl RateLimit {
    /// Three joins per thirty minutes.
    pub const DEFAULT: Self = Self {
        max_attempts: 3,
        window: Duration::from_secs(30 * 60),
    };
}

/// Result of counting one attempt against a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    /// The attempt counts; persist the window
    Allowed {
        /// Start of the (possibly fresh) window
        window_started_at: DateTime<Utc>,
        /// Attempts in the window including this one
        attempts: u32,
    },
    /// The user is at the limit
    Limited {
        /// Time until the window resets
        retry_after: Duration,
    },
}

impl RateLimit {
    /// Decides one attempt at `now` given the stored window, if any.
    ///
    /// A window older than `self.window` is replaced by a fresh one.
    #[must_use]
    pub fn admit(&self, current: Option<(DateTime<Utc>, u32)>, now: DateTime<Utc>) -> WindowDecision {
        let window_end = |started_at: DateTime<Utc>| {
            chrono::Duration::from_std(self.window)
                .ok()
                .and_then(|length| started_at.checked_add_signed(length))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        };
        let (started_at, attempts) = match current {
            Some((started_at, attempts)) if now < window_end(started_at) => (started_at, attempts),
            _ => (now, 0),
        };

        if attempts >= self.max_attempts {
            return WindowDecision::Limited {
                retry_after: (window_end(started_at) - now).to_std().unwrap_or_default(),
            };
        }
        WindowDecision::Allowed {
            window_started_at: started_at,
            attempts: attempts + 1,
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Per-user join limiter.
#[async_trait]
pub trait JoinRateLimiter: Send + Sync {
    /// Counts an attempt for `user_id` at `now`, rejecting it when the user is
    /// already at the limit for the current window.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` with the time until the window resets, or
    /// `Storage` if the counter could not be updated.
    async fn check_and_record(
        &self,
        user_id: UserId,
        limit: RateLimit,
        now: DateTime<Utc>,
    ) -> AdmissionResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_fills_then_resets() {
        let limit = RateLimit::DEFAULT;
        let t0 = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();

        let mut window = None;
        for expected in 1..=3 {
            match limit.admit(window, t0) {
                WindowDecision::Allowed {
                    window_started_at,
                    attempts,
                } => {
                    assert_eq!(attempts, expected);
                    window = Some((window_started_at, attempts));
                }
                WindowDecision::Limited { .. } => unreachable!("attempt {expected} was limited"),
            }
        }

        let later = t0 + chrono::Duration::minutes(10);
        assert_eq!(
            limit.admit(window, later),
            WindowDecision::Limited {
                retry_after: Duration::from_secs(20 * 60)
            }
        );

        let next_window = t0 + chrono::Duration::minutes(30);
        assert_eq!(
            limit.admit(window, next_window),
            WindowDecision::Allowed {
                window_started_at: next_window,
                attempts: 1
            }
        );
    }
}
