use crate::storage;
use admission_core::error::{AdmissionError, AdmissionResult};
use admission_core::rate_limit::{JoinRateLimiter, RateLimit, WindowDecision};
use admission_core::types::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Join limiter whose windows live in `join_rate_limits`, shared by every
/// server instance.
#[derive(Clone, Debug)]
pub struct PostgresRateLimiter {
    pool: PgPool,
}

impl PostgresRateLimiter {
    /// Creates a limiter on the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JoinRateLimiter for PostgresRateLimiter {
    async fn check_and_record(
        &self,
        user_id: UserId,
        limit: RateLimit,
        now: DateTime<Utc>,
    ) -> AdmissionResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        // Seed the row so FOR UPDATE always has something to lock
        sqlx::query(
            r"
            INSERT INTO join_rate_limits (user_id, window_started_at, attempts)
            VALUES ($1, $2, 0)
            ON CONFLICT (user_id) DO NOTHING
            ",
        )
        .bind(*user_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let (started_at, attempts): (DateTime<Utc>, i32) = sqlx::query_as(
            "SELECT window_started_at, attempts FROM join_rate_limits WHERE user_id = $1 FOR UPDATE",
        )
        .bind(*user_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;

        let current = u32::try_from(attempts)
            .ok()
            .filter(|attempts| *attempts > 0)
            .map(|attempts| (started_at, attempts));

        match limit.admit(current, now) {
            WindowDecision::Allowed {
                window_started_at,
                attempts,
            } => {
                sqlx::query(
                    "UPDATE join_rate_limits SET window_started_at = $2, attempts = $3 WHERE user_id = $1",
                )
                .bind(*user_id.as_uuid())
                .bind(window_started_at)
                .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
                tx.commit().await.map_err(storage)?;
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
