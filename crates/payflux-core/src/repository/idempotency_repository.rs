//! Idempotency store
//!
//! At-most-once semantics via a unique-index insert: the first caller to
//! claim a key proceeds, later callers replay the stored outcome. A key
//! reused with a different logical request is a conflict.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};

use crate::{Error, Result};

/// Operation family a key is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdempotencyScope {
    Payment,
    SubscriptionCreate,
    Refund,
    BillingAttempt,
}

impl IdempotencyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyScope::Payment => "payment",
            IdempotencyScope::SubscriptionCreate => "subscription_create",
            IdempotencyScope::Refund => "refund",
            IdempotencyScope::BillingAttempt => "billing_attempt",
        }
    }
}

/// Result of claiming a key
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// First sight of this key; the caller owns the operation
    Proceed,
    /// The key completed before; the stored response is returned verbatim
    Replay(serde_json::Value),
    /// Another claim is in flight (or a worker crashed mid-operation)
    InFlight,
}

/// Fingerprint of the logical request, used to detect key reuse
pub fn request_fingerprint(request: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(request).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    hex::encode(digest)
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Claim the key for this request, or learn the stored outcome.
    /// Fails with `IdempotencyConflict` when the key was used with a
    /// different logical request.
    async fn claim(
        &self,
        scope: IdempotencyScope,
        key: &str,
        fingerprint: &str,
    ) -> Result<ClaimOutcome>;

    /// Store the outcome. Invoked exactly once by the claim owner.
    async fn complete(
        &self,
        scope: IdempotencyScope,
        key: &str,
        response: &serde_json::Value,
    ) -> Result<()>;

    /// Abandon a claim that never reached the processor, freeing the key
    async fn release(&self, scope: IdempotencyScope, key: &str) -> Result<()>;
}

/// PostgreSQL implementation over the `idempotency_keys` table
#[derive(Clone)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn claim(
        &self,
        scope: IdempotencyScope,
        key: &str,
        fingerprint: &str,
    ) -> Result<ClaimOutcome> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (scope, idempotency_key, request_fingerprint, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (scope, idempotency_key) DO NOTHING
            "#,
        )
        .bind(scope.as_str())
        .bind(key)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            return Ok(ClaimOutcome::Proceed);
        }

        let row = sqlx::query(
            r#"
            SELECT request_fingerprint, response_body
            FROM idempotency_keys
            WHERE scope = $1 AND idempotency_key = $2
            "#,
        )
        .bind(scope.as_str())
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        let stored_fingerprint: String = row.try_get("request_fingerprint")?;
        if stored_fingerprint != fingerprint {
            return Err(Error::idempotency_conflict(format!(
                "key {} was already used with a different request",
                key
            )));
        }

        match row.try_get::<Option<serde_json::Value>, _>("response_body")? {
            Some(response) => Ok(ClaimOutcome::Replay(response)),
            None => Ok(ClaimOutcome::InFlight),
        }
    }

    async fn complete(
        &self,
        scope: IdempotencyScope,
        key: &str,
        response: &serde_json::Value,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET response_body = $3, completed_at = NOW()
            WHERE scope = $1 AND idempotency_key = $2 AND response_body IS NULL
            "#,
        )
        .bind(scope.as_str())
        .bind(key)
        .bind(response)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::idempotency_conflict(format!(
                "key {} already has a stored outcome",
                key
            )));
        }

        Ok(())
    }

    async fn release(&self, scope: IdempotencyScope, key: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM idempotency_keys
            WHERE scope = $1 AND idempotency_key = $2 AND response_body IS NULL
            "#,
        )
        .bind(scope.as_str())
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
