//! Subscription plan model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::Currency;

/// Billing interval unit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "interval_unit", rename_all = "snake_case")]
pub enum IntervalUnit {
    Day,
    Week,
    Month,
    Year,
}

/// Subscription plan
///
/// The interval is immutable once any subscription references the plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub interval_unit: IntervalUnit,
    pub interval_count: i32,
    pub trial_days: i32,
    pub setup_fee: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionPlan {
    pub fn has_trial(&self) -> bool {
        self.trial_days > 0
    }

    pub fn has_setup_fee(&self) -> bool {
        self.setup_fee > Decimal::ZERO
    }
}

/// Request to create a plan
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePlanRequest {
    #[validate(length(min = 1, max = 64), regex = "PLAN_CODE")]
    pub code: String,

    #[validate(length(min = 1, max = 200))]
    pub name: String,

    pub amount: Decimal,

    #[serde(default)]
    pub currency: Currency,

    pub interval_unit: IntervalUnit,

    #[validate(range(min = 1, max = 52))]
    pub interval_count: i32,

    #[validate(range(min = 0, max = 365))]
    #[serde(default)]
    pub trial_days: i32,

    #[serde(default)]
    pub setup_fee: Decimal,
}

lazy_static::lazy_static! {
    static ref PLAN_CODE: regex::Regex = regex::Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap();
}

impl CreatePlanRequest {
    pub fn validate_amounts(&self) -> crate::Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(crate::Error::validation("plan amount must be positive"));
        }
        if self.setup_fee < Decimal::ZERO {
            return Err(crate::Error::validation("setup fee cannot be negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use validator::Validate;

    fn request(code: &str) -> CreatePlanRequest {
        CreatePlanRequest {
            code: code.to_string(),
            name: "Pro Monthly".to_string(),
            amount: dec!(29.99),
            currency: Currency::USD,
            interval_unit: IntervalUnit::Month,
            interval_count: 1,
            trial_days: 14,
            setup_fee: Decimal::ZERO,
        }
    }

    #[test]
    fn test_valid_plan_code() {
        assert!(request("pro-monthly").validate().is_ok());
        assert!(request("basic_2024").validate().is_ok());
    }

    #[test]
    fn test_invalid_plan_code() {
        assert!(request("Pro Monthly").validate().is_err());
        assert!(request("-leading-dash").validate().is_err());
    }

    #[test]
    fn test_amount_validation() {
        let mut req = request("pro");
        req.amount = dec!(0);
        assert!(req.validate_amounts().is_err());

        req.amount = dec!(10.00);
        req.setup_fee = dec!(-1.00);
        assert!(req.validate_amounts().is_err());
    }
}
