//! Subscription model for recurring billing
//!
//! Lifecycle transitions are encoded in [`SubscriptionStatus::can_transition_to`].
//! Scheduled changes (cancellation, plan change) live in dedicated typed
//! columns; the metadata map carries client annotations only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Subscription status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created but not yet activated
    Pending,
    /// Billing normally (possibly in trial)
    Active,
    /// A recurring charge failed; dunning in progress
    PastDue,
    /// Paused by the customer; no billing
    Paused,
    /// Terminal
    Cancelled,
}

impl SubscriptionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        match self {
            Pending => matches!(next, Active | Cancelled),
            Active => matches!(next, PastDue | Paused | Cancelled),
            PastDue => matches!(next, Active | Cancelled),
            Paused => matches!(next, Active | Cancelled),
            Cancelled => false,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Subscription entity
///
/// Invariants: `current_period_start <= current_period_end`;
/// `next_billing_date == current_period_end` while ACTIVE or PAST_DUE
/// (or `trial_end` while in trial); `next_billing_date` is null once
/// CANCELLED.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub plan_code: String,
    pub payment_method_id: Uuid,
    pub status: SubscriptionStatus,

    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub billing_cycle_anchor: DateTime<Utc>,

    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,

    pub next_billing_date: Option<DateTime<Utc>>,

    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,

    // Scheduled changes, enacted by the lifecycle sweep
    pub scheduled_cancel_at: Option<DateTime<Utc>>,
    pub scheduled_plan_code: Option<String>,
    pub scheduled_plan_change_at: Option<DateTime<Utc>>,

    // Processor-side recurring billing profile
    pub recurring_profile_id: Option<String>,
    pub recurring_cancelled: bool,

    /// Creation idempotency key, unique per customer
    pub idempotency_key: Option<String>,

    /// Client annotations only
    pub metadata: sqlx::types::Json<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether the subscription is currently inside its trial window
    pub fn in_trial(&self, now: DateTime<Utc>) -> bool {
        match (self.trial_start, self.trial_end) {
            (Some(start), Some(end)) => now >= start && now < end,
            _ => false,
        }
    }
}

/// When a cancellation takes effect
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelTiming {
    Immediate,
    EndOfPeriod,
}

/// When a plan change takes effect
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeTiming {
    Immediate,
    EndOfPeriod,
}

impl Default for ChangeTiming {
    fn default() -> Self {
        ChangeTiming::EndOfPeriod
    }
}

/// Create subscription request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSubscriptionRequest {
    pub customer_id: Uuid,

    #[validate(length(min = 1, max = 64))]
    pub plan_code: String,

    pub payment_method_id: Uuid,

    /// Defaults to now
    pub start_date: Option<DateTime<Utc>>,

    /// Request the plan's trial period, if it has one
    #[serde(default)]
    pub start_trial: bool,

    pub billing_cycle_anchor: Option<DateTime<Utc>>,

    /// Bill the first period immediately instead of at period end
    #[serde(default)]
    pub prorated: bool,

    pub idempotency_key: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Update subscription request (plan change)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateSubscriptionRequest {
    pub plan_code: Option<String>,

    pub payment_method_id: Option<Uuid>,

    /// Apply proration arithmetic to an immediate plan change
    #[serde(default)]
    pub prorated: bool,

    #[serde(default)]
    pub change_option: ChangeTiming,
}

/// Cancel subscription request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CancelSubscriptionRequest {
    pub when: CancelTiming,

    /// Explicit effective date for END_OF_PERIOD; defaults to period end
    pub cancel_at: Option<DateTime<Utc>>,

    /// Issue a prorated credit for the unused remainder of the period
    #[serde(default)]
    pub refund_prorated: bool,

    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

/// Subscription filter for queries
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubscriptionFilter {
    pub customer_id: Option<Uuid>,
    pub plan_code: Option<String>,
    pub status: Option<SubscriptionStatus>,
    pub billing_before: Option<DateTime<Utc>>,
}
