//! Distributed token-bucket rate limiter
//!
//! Buckets live in the shared store (`rate_buckets` table) keyed by
//! identifier prefixes (`ip:`, `user:`, `api:`). The take is a single atomic
//! statement; there is no read-modify-write over the wire. Store failures
//! fail OPEN so a limiter outage cannot take the API down with it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::models::RateBucket;
use crate::Result;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Tokens left in the window; 0 when denied or unknown
    pub remaining: i64,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateDecision {
    fn fail_open() -> Self {
        Self { allowed: true, remaining: 0, reset_at: None }
    }
}

/// Storage backend for token buckets
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Atomically take one token. `remaining` is -1 in the returned row when
    /// the bucket is exhausted.
    async fn take_token(&self, key: &str, capacity: i64, window_secs: i64) -> Result<(i64, DateTime<Utc>)>;
}

/// PostgreSQL-backed bucket store
#[derive(Clone)]
pub struct PostgresRateStore {
    pool: PgPool,
}

impl PostgresRateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateStore for PostgresRateStore {
    async fn take_token(&self, key: &str, capacity: i64, window_secs: i64) -> Result<(i64, DateTime<Utc>)> {
        // Single upsert: a fresh or expired bucket resets to capacity - 1;
        // a live bucket decrements, bottoming out at -1 (denied)
        let bucket = sqlx::query_as::<_, RateBucket>(
            r#"
            INSERT INTO rate_buckets AS rb (bucket_key, tokens_remaining, window_expires_at)
            VALUES ($1, $2 - 1, NOW() + make_interval(secs => $3::DOUBLE PRECISION))
            ON CONFLICT (bucket_key) DO UPDATE
            SET tokens_remaining = CASE
                    WHEN rb.window_expires_at <= NOW() THEN $2 - 1
                    ELSE GREATEST(rb.tokens_remaining - 1, -1)
                END,
                window_expires_at = CASE
                    WHEN rb.window_expires_at <= NOW()
                        THEN NOW() + make_interval(secs => $3::DOUBLE PRECISION)
                    ELSE rb.window_expires_at
                END
            RETURNING bucket_key, tokens_remaining, window_expires_at
            "#,
        )
        .bind(key)
        .bind(capacity)
        .bind(window_secs as f64)
        .fetch_one(&self.pool)
        .await?;

        Ok((bucket.tokens_remaining, bucket.window_expires_at))
    }
}

pub struct RateLimiter {
    store: Arc<dyn RateStore>,
    config: RateLimitConfig,
}

const WINDOW_SECS: i64 = 3600;

impl RateLimiter {
    pub fn new(store: Arc<dyn RateStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Check an identifier against an hourly limit with a burst allowance.
    /// Identifiers carry their family prefix (`ip:`, `user:`, `api:`).
    pub async fn is_allowed(&self, identifier: &str, limit_per_hour: i64, burst: i64) -> RateDecision {
        if !self.config.enabled {
            return RateDecision { allowed: true, remaining: limit_per_hour, reset_at: None };
        }

        let capacity = limit_per_hour.max(burst).max(1);
        match self.store.take_token(identifier, capacity, WINDOW_SECS).await {
            Ok((remaining, reset_at)) => RateDecision {
                allowed: remaining >= 0,
                remaining: remaining.max(0),
                reset_at: Some(reset_at),
            },
            Err(e) => {
                // Fail open: a limiter outage must not deny service
                warn!(identifier, error = %e, "rate limit store unavailable, allowing request");
                RateDecision::fail_open()
            }
        }
    }

    /// Check with the configured default limits
    pub async fn is_allowed_default(&self, identifier: &str) -> RateDecision {
        self.is_allowed(identifier, self.config.default_per_hour, self.config.burst)
            .await
    }
}
