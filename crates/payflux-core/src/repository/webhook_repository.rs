//! Webhook repository
//!
//! Stores inbound events for dedupe/audit and outbound deliveries for the
//! retry queue. Claiming a delivery flips its status under a guard so two
//! sweepers racing on the same row do the work once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Webhook, WebhookDirection, WebhookStatus};
use crate::{Error, Result};

const WEBHOOK_COLUMNS: &str = r#"
    id, direction, event_type, event_id, endpoint_url, status, attempts,
    max_attempts, next_attempt_at, request_body, request_headers,
    response_code, response_headers, response_body, correlation_id,
    created_at, updated_at
"#;

/// New webhook record, before insertion
#[derive(Debug, Clone)]
pub struct NewWebhook {
    pub direction: WebhookDirection,
    pub event_type: String,
    pub event_id: String,
    pub endpoint_url: Option<String>,
    pub status: WebhookStatus,
    pub max_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub request_body: String,
    pub request_headers: serde_json::Value,
    pub correlation_id: String,
}

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn insert(&self, new: NewWebhook) -> Result<Webhook>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Webhook>>;

    /// Whether an inbound (event_id, event_type) pair was persisted since `since`
    async fn inbound_event_exists(
        &self,
        event_id: &str,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<bool>;

    async fn update_status(&self, id: Uuid, status: WebhookStatus) -> Result<()>;

    /// Claim due outbound deliveries: rows in PENDING/RETRYING with
    /// next_attempt_at in the past move to PROCESSING and are returned
    async fn claim_due_deliveries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Webhook>>;

    async fn record_delivery_success(
        &self,
        id: Uuid,
        attempts: i32,
        response_code: i32,
        response_headers: serde_json::Value,
        response_body: &str,
    ) -> Result<()>;

    /// Schedule another attempt after a retryable failure
    async fn record_delivery_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        response_code: Option<i32>,
        response_body: Option<&str>,
    ) -> Result<()>;

    /// Terminal failure; no further attempts
    async fn record_delivery_failure(
        &self,
        id: Uuid,
        attempts: i32,
        response_code: Option<i32>,
        response_body: Option<&str>,
    ) -> Result<()>;

    /// Push a claimed delivery back to the queue without consuming an attempt
    /// (used when the circuit breaker skips the endpoint)
    async fn requeue_delivery(&self, id: Uuid, next_attempt_at: DateTime<Utc>) -> Result<()>;

    /// Delete DELIVERED rows older than `delivered_before` and FAILED rows
    /// older than `failed_before`; returns rows removed
    async fn cleanup(
        &self,
        delivered_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<u64>;
}

#[derive(Clone)]
pub struct PostgresWebhookRepository {
    pool: PgPool,
}

impl PostgresWebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookRepository for PostgresWebhookRepository {
    async fn insert(&self, new: NewWebhook) -> Result<Webhook> {
        let query = format!(
            r#"
            INSERT INTO webhooks (
                id, direction, event_type, event_id, endpoint_url, status,
                attempts, max_attempts, next_attempt_at, request_body,
                request_headers, correlation_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, $9, $10, $11, NOW(), NOW())
            RETURNING {}
            "#,
            WEBHOOK_COLUMNS
        );

        let webhook = sqlx::query_as::<_, Webhook>(&query)
            .bind(Uuid::new_v4())
            .bind(new.direction)
            .bind(&new.event_type)
            .bind(&new.event_id)
            .bind(&new.endpoint_url)
            .bind(new.status)
            .bind(new.max_attempts)
            .bind(new.next_attempt_at)
            .bind(&new.request_body)
            .bind(sqlx::types::Json(new.request_headers))
            .bind(&new.correlation_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    Error::idempotency_conflict("duplicate inbound event")
                }
                _ => Error::Database(e),
            })?;

        Ok(webhook)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Webhook>> {
        let query = format!("SELECT {} FROM webhooks WHERE id = $1", WEBHOOK_COLUMNS);
        Ok(sqlx::query_as::<_, Webhook>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn inbound_event_exists(
        &self,
        event_id: &str,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        use sqlx::Row;
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM webhooks
                WHERE direction = 'inbound'
                  AND event_id = $1
                  AND event_type = $2
                  AND created_at >= $3
            ) AS found
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("found")?)
    }

    async fn update_status(&self, id: Uuid, status: WebhookStatus) -> Result<()> {
        sqlx::query("UPDATE webhooks SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim_due_deliveries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Webhook>> {
        let query = format!(
            r#"
            UPDATE webhooks
            SET status = 'processing', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM webhooks
                WHERE direction = 'outbound'
                  AND status IN ('pending', 'retrying')
                  AND next_attempt_at IS NOT NULL
                  AND next_attempt_at <= $1
                ORDER BY next_attempt_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            WEBHOOK_COLUMNS
        );

        Ok(sqlx::query_as::<_, Webhook>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn record_delivery_success(
        &self,
        id: Uuid,
        attempts: i32,
        response_code: i32,
        response_headers: serde_json::Value,
        response_body: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhooks
            SET status = 'delivered',
                attempts = $2,
                response_code = $3,
                response_headers = $4,
                response_body = $5,
                next_attempt_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(response_code)
        .bind(sqlx::types::Json(response_headers))
        .bind(response_body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_delivery_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        response_code: Option<i32>,
        response_body: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhooks
            SET status = 'retrying',
                attempts = $2,
                next_attempt_at = $3,
                response_code = $4,
                response_body = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(response_code)
        .bind(response_body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_delivery_failure(
        &self,
        id: Uuid,
        attempts: i32,
        response_code: Option<i32>,
        response_body: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhooks
            SET status = 'failed',
                attempts = $2,
                next_attempt_at = NULL,
                response_code = $3,
                response_body = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(response_code)
        .bind(response_body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn requeue_delivery(&self, id: Uuid, next_attempt_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhooks
            SET status = 'retrying', next_attempt_at = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cleanup(
        &self,
        delivered_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<u64> {
        let removed = sqlx::query(
            r#"
            DELETE FROM webhooks
            WHERE (status = 'delivered' AND updated_at < $1)
               OR (status = 'failed' AND updated_at < $2)
            "#,
        )
        .bind(delivered_before)
        .bind(failed_before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(removed)
    }
}
