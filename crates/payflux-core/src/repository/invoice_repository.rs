//! Subscription invoice repository
//!
//! Retry scheduling updates are status-guarded so a single worker claims an
//! invoice before attempting payment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{InvoiceStatus, NewInvoice, SubscriptionInvoice};
use crate::{Error, Result};

const INVOICE_COLUMNS: &str = r#"
    id, number, subscription_id, invoice_type, amount, currency, status,
    period_start, period_end, due_date, payment_attempts,
    next_payment_attempt, transaction_id, failure_reason,
    created_at, updated_at
"#;

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Insert a new invoice; the implementation assigns the number
    async fn create(&self, new: NewInvoice) -> Result<SubscriptionInvoice>;

    /// Claim a billing period by inserting its BILL invoice. The unique
    /// (subscription, period_start) index makes the insert the claim:
    /// None means another worker already billed this period.
    async fn create_if_absent(&self, new: NewInvoice) -> Result<Option<SubscriptionInvoice>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SubscriptionInvoice>>;

    async fn find_by_number(&self, number: &str) -> Result<Option<SubscriptionInvoice>>;

    async fn list_by_subscription(&self, subscription_id: Uuid) -> Result<Vec<SubscriptionInvoice>>;

    /// An open or paid non-credit invoice covering the given period start,
    /// used to avoid double billing
    async fn find_for_period(
        &self,
        subscription_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<Option<SubscriptionInvoice>>;

    /// Claim the invoice for a payment attempt. Only one worker wins.
    async fn mark_processing(&self, id: Uuid, from: InvoiceStatus) -> Result<SubscriptionInvoice>;

    async fn mark_paid(&self, id: Uuid, transaction_id: Uuid) -> Result<()>;

    async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
        attempts: i32,
        next_payment_attempt: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn mark_cancelled(&self, id: Uuid) -> Result<()>;

    /// PENDING non-credit invoices whose due date has arrived (setup fees,
    /// proration charges, immediate first-period bills)
    async fn due_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<SubscriptionInvoice>>;

    /// FAILED invoices whose retry time has arrived. Includes invoices that
    /// have exhausted their attempts; the caller enacts the termination rule.
    async fn due_for_retry(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<SubscriptionInvoice>>;

    /// Sum of unapplied credit amounts (negative) for a subscription
    async fn open_credit_total(&self, subscription_id: Uuid) -> Result<Decimal>;

    /// Mark all open credits applied; returns the total consumed (negative)
    async fn consume_credits(&self, subscription_id: Uuid) -> Result<Decimal>;
}

#[derive(Clone)]
pub struct PostgresInvoiceRepository {
    pool: PgPool,
}

impl PostgresInvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceRepository for PostgresInvoiceRepository {
    async fn create(&self, new: NewInvoice) -> Result<SubscriptionInvoice> {
        let query = format!(
            r#"
            INSERT INTO subscription_invoices (
                id, number, subscription_id, invoice_type, amount, currency,
                status, period_start, period_end, due_date,
                payment_attempts, created_at, updated_at
            )
            VALUES (
                $1,
                'INV-' || LPAD(nextval('invoice_number_seq')::TEXT, 6, '0'),
                $2, $3, $4, $5, 'pending', $6, $7, $8, 0, NOW(), NOW()
            )
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        );

        let invoice = sqlx::query_as::<_, SubscriptionInvoice>(&query)
            .bind(Uuid::new_v4())
            .bind(new.subscription_id)
            .bind(new.invoice_type)
            .bind(new.amount)
            .bind(new.currency)
            .bind(new.period_start)
            .bind(new.period_end)
            .bind(new.due_date)
            .fetch_one(&self.pool)
            .await?;

        Ok(invoice)
    }

    async fn create_if_absent(&self, new: NewInvoice) -> Result<Option<SubscriptionInvoice>> {
        let query = format!(
            r#"
            INSERT INTO subscription_invoices (
                id, number, subscription_id, invoice_type, amount, currency,
                status, period_start, period_end, due_date,
                payment_attempts, created_at, updated_at
            )
            VALUES (
                $1,
                'INV-' || LPAD(nextval('invoice_number_seq')::TEXT, 6, '0'),
                $2, $3, $4, $5, 'pending', $6, $7, $8, 0, NOW(), NOW()
            )
            ON CONFLICT (subscription_id, period_start) WHERE invoice_type = 'bill'
            DO NOTHING
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        );

        Ok(sqlx::query_as::<_, SubscriptionInvoice>(&query)
            .bind(Uuid::new_v4())
            .bind(new.subscription_id)
            .bind(new.invoice_type)
            .bind(new.amount)
            .bind(new.currency)
            .bind(new.period_start)
            .bind(new.period_end)
            .bind(new.due_date)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SubscriptionInvoice>> {
        let query = format!("SELECT {} FROM subscription_invoices WHERE id = $1", INVOICE_COLUMNS);
        Ok(sqlx::query_as::<_, SubscriptionInvoice>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_number(&self, number: &str) -> Result<Option<SubscriptionInvoice>> {
        let query = format!(
            "SELECT {} FROM subscription_invoices WHERE number = $1",
            INVOICE_COLUMNS
        );
        Ok(sqlx::query_as::<_, SubscriptionInvoice>(&query)
            .bind(number)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_by_subscription(&self, subscription_id: Uuid) -> Result<Vec<SubscriptionInvoice>> {
        let query = format!(
            "SELECT {} FROM subscription_invoices WHERE subscription_id = $1 ORDER BY created_at",
            INVOICE_COLUMNS
        );
        Ok(sqlx::query_as::<_, SubscriptionInvoice>(&query)
            .bind(subscription_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_for_period(
        &self,
        subscription_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<Option<SubscriptionInvoice>> {
        let query = format!(
            r#"
            SELECT {} FROM subscription_invoices
            WHERE subscription_id = $1
              AND period_start = $2
              AND invoice_type = 'bill'
              AND status IN ('pending', 'processing', 'paid', 'failed')
            LIMIT 1
            "#,
            INVOICE_COLUMNS
        );
        Ok(sqlx::query_as::<_, SubscriptionInvoice>(&query)
            .bind(subscription_id)
            .bind(period_start)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn mark_processing(&self, id: Uuid, from: InvoiceStatus) -> Result<SubscriptionInvoice> {
        let query = format!(
            r#"
            UPDATE subscription_invoices
            SET status = 'processing', updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        );

        sqlx::query_as::<_, SubscriptionInvoice>(&query)
            .bind(id)
            .bind(from)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::validation(format!("invoice {} was claimed by another worker", id)))
    }

    async fn mark_paid(&self, id: Uuid, transaction_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subscription_invoices
            SET status = 'paid',
                transaction_id = $2,
                next_payment_attempt = NULL,
                failure_reason = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
        attempts: i32,
        next_payment_attempt: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subscription_invoices
            SET status = 'failed',
                failure_reason = $2,
                payment_attempts = $3,
                next_payment_attempt = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(attempts)
        .bind(next_payment_attempt)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subscription_invoices
            SET status = 'cancelled', next_payment_attempt = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn due_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<SubscriptionInvoice>> {
        let query = format!(
            r#"
            SELECT {} FROM subscription_invoices
            WHERE status = 'pending'
              AND invoice_type <> 'credit'
              AND due_date <= $1
            ORDER BY due_date
            LIMIT $2
            "#,
            INVOICE_COLUMNS
        );
        Ok(sqlx::query_as::<_, SubscriptionInvoice>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn due_for_retry(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<SubscriptionInvoice>> {
        let query = format!(
            r#"
            SELECT {} FROM subscription_invoices
            WHERE status = 'failed'
              AND next_payment_attempt IS NOT NULL
              AND next_payment_attempt <= $1
            ORDER BY next_payment_attempt
            LIMIT $2
            "#,
            INVOICE_COLUMNS
        );
        Ok(sqlx::query_as::<_, SubscriptionInvoice>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn open_credit_total(&self, subscription_id: Uuid) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) AS credit
            FROM subscription_invoices
            WHERE subscription_id = $1 AND invoice_type = 'credit' AND status = 'pending'
            "#,
        )
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("credit")?)
    }

    async fn consume_credits(&self, subscription_id: Uuid) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            WITH consumed AS (
                UPDATE subscription_invoices
                SET status = 'paid', updated_at = NOW()
                WHERE subscription_id = $1 AND invoice_type = 'credit' AND status = 'pending'
                RETURNING amount
            )
            SELECT COALESCE(SUM(amount), 0) AS credit FROM consumed
            "#,
        )
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("credit")?)
    }
}
