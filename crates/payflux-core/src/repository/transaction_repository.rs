//! Transaction ledger repository
//!
//! Status changes go through `transition_status`, which guards the update
//! with the expected current status so concurrent writers serialize per row
//! and illegal edges never reach the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{NewTransaction, PaymentStatus, Transaction, TransactionOutcome};
use crate::{Error, Result};

const TRANSACTION_COLUMNS: &str = r#"
    id, external_processor_id, parent_id, order_id, customer_id,
    transaction_type, amount, currency, status, idempotency_key,
    correlation_id, auth_code, avs_result, cvv_result, response_code,
    failure_reason, request_blob, response_blob, created_at, processed_at
"#;

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Insert a new PENDING ledger row
    async fn insert(&self, new: NewTransaction) -> Result<Transaction>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>>;

    async fn find_by_processor_id(&self, external_id: &str) -> Result<Option<Transaction>>;

    /// Move a transaction along a state-machine edge, recording the
    /// processor outcome. Fails if the row is no longer in `from`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        outcome: &TransactionOutcome,
    ) -> Result<Transaction>;

    /// Record a processor outcome without changing status, for transient
    /// failures that leave the row PENDING until reconciliation
    async fn record_outcome(&self, id: Uuid, outcome: &TransactionOutcome) -> Result<Transaction>;

    /// Sum of settled refund children of a transaction
    async fn refunded_amount(&self, parent_id: Uuid) -> Result<Decimal>;

    async fn list_children(&self, parent_id: Uuid) -> Result<Vec<Transaction>>;

    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<Transaction>>;

    /// Charges created for a customer since `since` (velocity heuristic)
    async fn count_recent_by_customer(&self, customer_id: Uuid, since: DateTime<Utc>) -> Result<i64>;

    /// PENDING transactions older than `older_than`, for reconciliation
    async fn find_stale_pending(&self, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<Transaction>>;

    /// (failed, total) counts over a window, both with the same denominator
    async fn failure_stats(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(i64, i64)>;
}

#[derive(Clone)]
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn insert(&self, new: NewTransaction) -> Result<Transaction> {
        let query = format!(
            r#"
            INSERT INTO transactions (
                id, parent_id, order_id, customer_id, transaction_type,
                amount, currency, status, idempotency_key, correlation_id,
                request_blob, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10, NOW())
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );

        let transaction = sqlx::query_as::<_, Transaction>(&query)
            .bind(Uuid::new_v4())
            .bind(new.parent_id)
            .bind(new.order_id)
            .bind(new.customer_id)
            .bind(new.transaction_type)
            .bind(new.amount)
            .bind(new.currency)
            .bind(new.idempotency_key)
            .bind(new.correlation_id)
            .bind(sqlx::types::Json(new.request_blob))
            .fetch_one(&self.pool)
            .await?;

        Ok(transaction)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>> {
        let query = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        Ok(sqlx::query_as::<_, Transaction>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_processor_id(&self, external_id: &str) -> Result<Option<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions WHERE external_processor_id = $1 ORDER BY created_at DESC LIMIT 1",
            TRANSACTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Transaction>(&query)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        outcome: &TransactionOutcome,
    ) -> Result<Transaction> {
        if !from.can_transition_to(to) {
            return Err(Error::validation(format!(
                "illegal payment status transition {} -> {}",
                from, to
            )));
        }

        let query = format!(
            r#"
            UPDATE transactions
            SET status = $3,
                external_processor_id = COALESCE($4, external_processor_id),
                auth_code = COALESCE($5, auth_code),
                avs_result = COALESCE($6, avs_result),
                cvv_result = COALESCE($7, cvv_result),
                response_code = COALESCE($8, response_code),
                failure_reason = COALESCE($9, failure_reason),
                response_blob = COALESCE($10, response_blob),
                processed_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );

        let updated = sqlx::query_as::<_, Transaction>(&query)
            .bind(id)
            .bind(from)
            .bind(to)
            .bind(&outcome.external_processor_id)
            .bind(&outcome.auth_code)
            .bind(&outcome.avs_result)
            .bind(&outcome.cvv_result)
            .bind(&outcome.response_code)
            .bind(&outcome.failure_reason)
            .bind(outcome.response_blob.clone().map(sqlx::types::Json))
            .fetch_optional(&self.pool)
            .await?;

        updated.ok_or_else(|| {
            Error::validation(format!(
                "transaction {} is no longer in status {}",
                id, from
            ))
        })
    }

    async fn record_outcome(&self, id: Uuid, outcome: &TransactionOutcome) -> Result<Transaction> {
        let query = format!(
            r#"
            UPDATE transactions
            SET external_processor_id = COALESCE($2, external_processor_id),
                auth_code = COALESCE($3, auth_code),
                avs_result = COALESCE($4, avs_result),
                cvv_result = COALESCE($5, cvv_result),
                response_code = COALESCE($6, response_code),
                failure_reason = COALESCE($7, failure_reason),
                response_blob = COALESCE($8, response_blob)
            WHERE id = $1
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );

        let updated = sqlx::query_as::<_, Transaction>(&query)
            .bind(id)
            .bind(&outcome.external_processor_id)
            .bind(&outcome.auth_code)
            .bind(&outcome.avs_result)
            .bind(&outcome.cvv_result)
            .bind(&outcome.response_code)
            .bind(&outcome.failure_reason)
            .bind(outcome.response_blob.clone().map(sqlx::types::Json))
            .fetch_optional(&self.pool)
            .await?;

        updated.ok_or_else(|| Error::not_found(format!("transaction {}", id)))
    }

    async fn refunded_amount(&self, parent_id: Uuid) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) AS refunded
            FROM transactions
            WHERE parent_id = $1
              AND transaction_type IN ('refund', 'partial_refund')
              AND status = 'settled'
            "#,
        )
        .bind(parent_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("refunded")?)
    }

    async fn list_children(&self, parent_id: Uuid) -> Result<Vec<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions WHERE parent_id = $1 ORDER BY created_at",
            TRANSACTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Transaction>(&query)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions WHERE order_id = $1 ORDER BY created_at",
            TRANSACTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Transaction>(&query)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn count_recent_by_customer(&self, customer_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS charge_count
            FROM transactions
            WHERE customer_id = $1
              AND transaction_type IN ('purchase', 'authorize')
              AND created_at >= $2
            "#,
        )
        .bind(customer_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("charge_count")?)
    }

    async fn find_stale_pending(&self, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<Transaction>> {
        let query = format!(
            r#"
            SELECT {} FROM transactions
            WHERE status = 'pending'
              AND external_processor_id IS NOT NULL
              AND created_at < $1
            ORDER BY created_at
            LIMIT $2
            "#,
            TRANSACTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Transaction>(&query)
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn failure_stats(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) AS total
            FROM transactions
            WHERE created_at >= $1 AND created_at < $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok((row.try_get("failed")?, row.try_get("total")?))
    }
}
