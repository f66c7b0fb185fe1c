//! In-process fixed-window join limiter.
//!
//! Suitable for a single server instance. Deployments with several instances
//! use the Postgres-backed limiter so the window is shared.

use admission_core::error::{AdmissionError, AdmissionResult};
use admission_core::rate_limit::{JoinRateLimiter, RateLimit, WindowDecision};
use admission_core::types::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

/// Fixed-window limiter keyed by user.
#[derive(Debug, Default)]
pub struct FixedWindowRateLimiter {
    windows: Mutex<HashMap<UserId, Window>>,
}

impl FixedWindowRateLimiter {
    /// Creates an empty limiter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every window (tests and admin tooling).
    pub fn reset(&self) {
        if let Ok(mut windows) = self.windows.lock() {
            windows.clear();
        }
    }
}

#[async_trait]
impl JoinRateLimiter for FixedWindowRateLimiter {
    async fn check_and_record(
        &self,
        user_id: UserId,
        limit: RateLimit,
        now: DateTime<Utc>,
    ) -> AdmissionResult<()> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| AdmissionError::storage("rate limiter lock poisoned"))?;

        let current = windows
            .get(&user_id)
            .map(|window| (window.started_at, window.count));

        match limit.admit(current, now) {
            WindowDecision::Allowed {
                window_started_at,
                attempts,
            } => {
                windows.insert(
                    user_id,
                    Window {
                        started_at: window_started_at,
                        count: attempts,
                    },
                );
                Ok(())
            }
            WindowDecision::Limited { retry_after } => {
                tracing::warn!(
                    %user_id,
                    max_attempts = limit.max_attempts,
                    retry_after_secs = retry_after.as_secs(),
                    "Join rate limit exceeded"
                );
                metrics::counter!("admission_joins_rate_limited_total").increment(1);
                Err(AdmissionError::RateLimited { retry_after })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    const LIMIT: RateLimit = RateLimit {
        max_attempts: 3,
        window: Duration::from_secs(1800),
    };

    #[tokio::test]
    async fn fourth_join_in_window_is_rejected() {
        let limiter = FixedWindowRateLimiter::new();
        let user_id = UserId::new();
        let start = Utc::now();

        for minute in 0..3 {
            limiter
                .check_and_record(user_id, LIMIT, start + chrono::Duration::minutes(minute))
                .await
                .unwrap();
        }

        let rejected = limiter
            .check_and_record(user_id, LIMIT, start + chrono::Duration::minutes(10))
            .await;
        assert_eq!(
            rejected,
            Err(AdmissionError::RateLimited {
                retry_after: Duration::from_secs(20 * 60)
            })
        );
    }

    #[tokio::test]
    async fn window_resets_and_users_are_independent() {
        let limiter = FixedWindowRateLimiter::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        let start = Utc::now();

        for _ in 0..3 {
            limiter.check_and_record(alice, LIMIT, start).await.unwrap();
        }
        assert!(limiter.check_and_record(alice, LIMIT, start).await.is_err());
        assert!(limiter.check_and_record(bob, LIMIT, start).await.is_ok());

        let later = start + chrono::Duration::minutes(30);
        assert!(limiter.check_and_record(alice, LIMIT, later).await.is_ok());
    }
}
