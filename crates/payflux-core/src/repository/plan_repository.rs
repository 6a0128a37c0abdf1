//! Subscription plan repository

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CreatePlanRequest, SubscriptionPlan};
use crate::{Error, Result};

const PLAN_COLUMNS: &str = r#"
    id, code, name, amount, currency, interval_unit, interval_count,
    trial_days, setup_fee, active, created_at, updated_at
"#;

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn create(&self, request: &CreatePlanRequest) -> Result<SubscriptionPlan>;

    async fn find_by_code(&self, code: &str) -> Result<Option<SubscriptionPlan>>;

    async fn list(&self, active_only: bool) -> Result<Vec<SubscriptionPlan>>;

    async fn deactivate(&self, code: &str) -> Result<()>;

    /// How many subscriptions reference the plan; a non-zero count freezes
    /// the plan's interval
    async fn subscription_count(&self, code: &str) -> Result<i64>;
}

#[derive(Clone)]
pub struct PostgresPlanRepository {
    pool: PgPool,
}

impl PostgresPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn create(&self, request: &CreatePlanRequest) -> Result<SubscriptionPlan> {
        let query = format!(
            r#"
            INSERT INTO subscription_plans (
                id, code, name, amount, currency, interval_unit, interval_count,
                trial_days, setup_fee, active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE, NOW(), NOW())
            RETURNING {}
            "#,
            PLAN_COLUMNS
        );

        let plan = sqlx::query_as::<_, SubscriptionPlan>(&query)
            .bind(Uuid::new_v4())
            .bind(&request.code)
            .bind(&request.name)
            .bind(request.amount)
            .bind(request.currency)
            .bind(request.interval_unit)
            .bind(request.interval_count)
            .bind(request.trial_days)
            .bind(request.setup_fee)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    Error::validation(format!("plan code {} already exists", request.code))
                }
                _ => Error::Database(e),
            })?;

        Ok(plan)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<SubscriptionPlan>> {
        let query = format!("SELECT {} FROM subscription_plans WHERE code = $1", PLAN_COLUMNS);
        Ok(sqlx::query_as::<_, SubscriptionPlan>(&query)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list(&self, active_only: bool) -> Result<Vec<SubscriptionPlan>> {
        let query = if active_only {
            format!("SELECT {} FROM subscription_plans WHERE active ORDER BY code", PLAN_COLUMNS)
        } else {
            format!("SELECT {} FROM subscription_plans ORDER BY code", PLAN_COLUMNS)
        };
        Ok(sqlx::query_as::<_, SubscriptionPlan>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn deactivate(&self, code: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE subscription_plans SET active = FALSE, updated_at = NOW() WHERE code = $1",
        )
        .bind(code)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::not_found(format!("plan {}", code)));
        }
        Ok(())
    }

    async fn subscription_count(&self, code: &str) -> Result<i64> {
        use sqlx::Row;
        let row = sqlx::query("SELECT COUNT(*) AS n FROM subscriptions WHERE plan_code = $1")
            .bind(code)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}
