//! Subscription repository
//!
//! Per-subscription billing work is serialized by claiming rows with
//! status-guarded updates; sweeps never read-modify-write unguarded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Pagination, Subscription, SubscriptionStatus};
use crate::{Error, Result};

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, customer_id, plan_code, payment_method_id, status,
    current_period_start, current_period_end, billing_cycle_anchor,
    trial_start, trial_end, next_billing_date,
    cancelled_at, cancellation_reason,
    scheduled_cancel_at, scheduled_plan_code, scheduled_plan_change_at,
    recurring_profile_id, recurring_cancelled,
    idempotency_key, metadata, created_at, updated_at
"#;

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert a fully built subscription row
    async fn create(&self, subscription: &Subscription) -> Result<Subscription>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscription>>;

    /// Creation-idempotency lookup
    async fn find_by_customer_and_key(
        &self,
        customer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Subscription>>;

    /// Persist every mutable column of the row
    async fn update(&self, subscription: &Subscription) -> Result<Subscription>;

    /// Status-guarded lifecycle transition
    async fn transition_status(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<()>;

    async fn list_by_customer(&self, customer_id: Uuid, page: &Pagination) -> Result<Vec<Subscription>>;

    /// ACTIVE subscriptions whose next_billing_date has passed
    async fn due_for_billing(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>>;

    /// ACTIVE subscriptions still inside a trial that has ended
    async fn find_trials_ending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>>;

    async fn find_scheduled_cancellations(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>>;

    async fn find_scheduled_plan_changes(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>>;
}

#[derive(Clone)]
pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn create(&self, subscription: &Subscription) -> Result<Subscription> {
        let query = format!(
            r#"
            INSERT INTO subscriptions (
                id, customer_id, plan_code, payment_method_id, status,
                current_period_start, current_period_end, billing_cycle_anchor,
                trial_start, trial_end, next_billing_date,
                scheduled_cancel_at, scheduled_plan_code, scheduled_plan_change_at,
                recurring_profile_id, recurring_cancelled,
                idempotency_key, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, NOW(), NOW())
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        );

        let created = sqlx::query_as::<_, Subscription>(&query)
            .bind(subscription.id)
            .bind(subscription.customer_id)
            .bind(&subscription.plan_code)
            .bind(subscription.payment_method_id)
            .bind(subscription.status)
            .bind(subscription.current_period_start)
            .bind(subscription.current_period_end)
            .bind(subscription.billing_cycle_anchor)
            .bind(subscription.trial_start)
            .bind(subscription.trial_end)
            .bind(subscription.next_billing_date)
            .bind(subscription.scheduled_cancel_at)
            .bind(&subscription.scheduled_plan_code)
            .bind(subscription.scheduled_plan_change_at)
            .bind(&subscription.recurring_profile_id)
            .bind(subscription.recurring_cancelled)
            .bind(&subscription.idempotency_key)
            .bind(subscription.metadata.clone())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => Error::idempotency_conflict(
                    "a subscription with this idempotency key already exists for the customer",
                ),
                _ => Error::Database(e),
            })?;

        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscription>> {
        let query = format!("SELECT {} FROM subscriptions WHERE id = $1", SUBSCRIPTION_COLUMNS);
        Ok(sqlx::query_as::<_, Subscription>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_customer_and_key(
        &self,
        customer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Subscription>> {
        let query = format!(
            "SELECT {} FROM subscriptions WHERE customer_id = $1 AND idempotency_key = $2",
            SUBSCRIPTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Subscription>(&query)
            .bind(customer_id)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn update(&self, subscription: &Subscription) -> Result<Subscription> {
        let query = format!(
            r#"
            UPDATE subscriptions
            SET plan_code = $2,
                payment_method_id = $3,
                status = $4,
                current_period_start = $5,
                current_period_end = $6,
                billing_cycle_anchor = $7,
                trial_start = $8,
                trial_end = $9,
                next_billing_date = $10,
                cancelled_at = $11,
                cancellation_reason = $12,
                scheduled_cancel_at = $13,
                scheduled_plan_code = $14,
                scheduled_plan_change_at = $15,
                recurring_profile_id = $16,
                recurring_cancelled = $17,
                metadata = $18,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        );

        let updated = sqlx::query_as::<_, Subscription>(&query)
            .bind(subscription.id)
            .bind(&subscription.plan_code)
            .bind(subscription.payment_method_id)
            .bind(subscription.status)
            .bind(subscription.current_period_start)
            .bind(subscription.current_period_end)
            .bind(subscription.billing_cycle_anchor)
            .bind(subscription.trial_start)
            .bind(subscription.trial_end)
            .bind(subscription.next_billing_date)
            .bind(subscription.cancelled_at)
            .bind(&subscription.cancellation_reason)
            .bind(subscription.scheduled_cancel_at)
            .bind(&subscription.scheduled_plan_code)
            .bind(subscription.scheduled_plan_change_at)
            .bind(&subscription.recurring_profile_id)
            .bind(subscription.recurring_cancelled)
            .bind(subscription.metadata.clone())
            .fetch_optional(&self.pool)
            .await?;

        updated.ok_or_else(|| Error::not_found(format!("subscription {}", subscription.id)))
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(Error::validation(format!(
                "illegal subscription transition {} -> {}",
                from, to
            )));
        }

        let updated = sqlx::query(
            "UPDATE subscriptions SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::validation(format!(
                "subscription {} is no longer in status {}",
                id, from
            )));
        }
        Ok(())
    }

    async fn list_by_customer(&self, customer_id: Uuid, page: &Pagination) -> Result<Vec<Subscription>> {
        let query = format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE customer_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            SUBSCRIPTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Subscription>(&query)
            .bind(customer_id)
            .bind(page.per_page)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?)
    }

    async fn due_for_billing(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>> {
        let query = format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE status = 'active'
              AND next_billing_date IS NOT NULL
              AND next_billing_date <= $1
            ORDER BY next_billing_date
            LIMIT $2
            "#,
            SUBSCRIPTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Subscription>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_trials_ending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>> {
        let query = format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE status = 'active'
              AND trial_end IS NOT NULL
              AND trial_end <= $1
              AND current_period_start < trial_end
            ORDER BY trial_end
            LIMIT $2
            "#,
            SUBSCRIPTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Subscription>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_scheduled_cancellations(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>> {
        let query = format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE status IN ('active', 'past_due', 'paused')
              AND scheduled_cancel_at IS NOT NULL
              AND scheduled_cancel_at <= $1
            ORDER BY scheduled_cancel_at
            LIMIT $2
            "#,
            SUBSCRIPTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Subscription>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_scheduled_plan_changes(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>> {
        let query = format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE status IN ('active', 'past_due')
              AND scheduled_plan_code IS NOT NULL
              AND scheduled_plan_change_at IS NOT NULL
              AND scheduled_plan_change_at <= $1
            ORDER BY scheduled_plan_change_at
            LIMIT $2
            "#,
            SUBSCRIPTION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Subscription>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }
}
