//! Day-based proration arithmetic
//!
//! Daily rates carry four decimal places (half-up); component amounts are
//! truncated to cents so the charge never exceeds what the day count covers,
//! and the net is their difference.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::Currency;

/// Largest net amount proration will ever produce
const MAX_NET_AMOUNT: Decimal = dec!(10000);
/// Billing periods outside this day range are treated as data errors
const MIN_PERIOD_DAYS: i64 = 1;
const MAX_PERIOD_DAYS: i64 = 400;

/// Direction of the prorated adjustment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProrationType {
    Charge,
    Credit,
    None,
}

/// Full proration breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProrationResult {
    pub original_amount: Decimal,
    pub new_amount: Decimal,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub change_date: DateTime<Utc>,
    pub total_days_in_period: i64,
    pub days_used: i64,
    pub days_remaining: i64,
    pub unused_amount: Decimal,
    pub prorated_amount: Decimal,
    pub net_amount: Decimal,
    pub proration_type: ProrationType,
    pub currency: Currency,
    pub applies: bool,
    pub reason: Option<String>,
    pub explanation: String,
}

impl ProrationResult {
    fn not_applicable(
        original_amount: Decimal,
        new_amount: Decimal,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        change_date: DateTime<Utc>,
        currency: Currency,
        reason: &str,
    ) -> Self {
        Self {
            original_amount,
            new_amount,
            period_start,
            period_end,
            change_date,
            total_days_in_period: 0,
            days_used: 0,
            days_remaining: 0,
            unused_amount: Decimal::ZERO,
            prorated_amount: Decimal::ZERO,
            net_amount: Decimal::ZERO,
            proration_type: ProrationType::None,
            currency,
            applies: false,
            reason: Some(reason.to_string()),
            explanation: format!("no proration: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProrationCalculator;

impl ProrationCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Prorate a mid-period plan change from `original_amount` to
    /// `new_amount` effective at `change_date`
    pub fn calculate_plan_change(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        original_amount: Decimal,
        new_amount: Decimal,
        change_date: DateTime<Utc>,
        currency: Currency,
    ) -> ProrationResult {
        let na = |reason: &str| {
            ProrationResult::not_applicable(
                original_amount,
                new_amount,
                period_start,
                period_end,
                change_date,
                currency,
                reason,
            )
        };

        if original_amount == new_amount {
            return na("plan amounts are equal");
        }
        if change_date <= period_start || change_date >= period_end {
            return na("change date is outside the billing period");
        }

        let total_days = (period_end - period_start).num_days();
        if !(MIN_PERIOD_DAYS..=MAX_PERIOD_DAYS).contains(&total_days) {
            return na("billing period length is out of bounds");
        }

        let days_used = (change_date - period_start).num_days().max(0);
        let days_remaining = total_days - days_used;
        if days_remaining < 0 {
            return na("no days remain in the period");
        }

        let daily_old = Self::daily_rate(original_amount, total_days);
        let daily_new = Self::daily_rate(new_amount, total_days);

        let remaining = Decimal::from(days_remaining);
        let unused_amount = Self::to_cents(daily_old * remaining);
        let prorated_amount = Self::to_cents(daily_new * remaining);
        let net_amount = prorated_amount - unused_amount;

        if net_amount.abs() > MAX_NET_AMOUNT {
            return na("net amount exceeds the sanity bound");
        }

        let proration_type = if net_amount > Decimal::ZERO {
            ProrationType::Charge
        } else if net_amount < Decimal::ZERO {
            ProrationType::Credit
        } else {
            ProrationType::None
        };

        let explanation = format!(
            "{} days of {} remaining: unused {} at {}/day, new {} at {}/day, net {}",
            days_remaining, total_days, unused_amount, daily_old, prorated_amount, daily_new, net_amount,
        );

        ProrationResult {
            original_amount,
            new_amount,
            period_start,
            period_end,
            change_date,
            total_days_in_period: total_days,
            days_used,
            days_remaining,
            unused_amount,
            prorated_amount,
            net_amount,
            proration_type,
            currency,
            applies: proration_type != ProrationType::None,
            reason: None,
            explanation,
        }
    }

    /// Credit for the unused remainder when a subscription cancels mid-period
    pub fn calculate_cancellation_refund(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        amount: Decimal,
        change_date: DateTime<Utc>,
        currency: Currency,
    ) -> ProrationResult {
        let na = |reason: &str| {
            ProrationResult::not_applicable(
                amount,
                Decimal::ZERO,
                period_start,
                period_end,
                change_date,
                currency,
                reason,
            )
        };

        if change_date >= period_end {
            return na("the billing period has already ended");
        }
        if change_date <= period_start {
            return na("change date is outside the billing period");
        }

        let total_days = (period_end - period_start).num_days();
        if !(MIN_PERIOD_DAYS..=MAX_PERIOD_DAYS).contains(&total_days) {
            return na("billing period length is out of bounds");
        }

        let days_used = (change_date - period_start).num_days().max(0);
        let days_remaining = total_days - days_used;

        let daily_old = Self::daily_rate(amount, total_days);
        let unused_amount = Self::to_cents(daily_old * Decimal::from(days_remaining));
        let net_amount = -unused_amount;

        if net_amount.abs() > MAX_NET_AMOUNT {
            return na("net amount exceeds the sanity bound");
        }

        ProrationResult {
            original_amount: amount,
            new_amount: Decimal::ZERO,
            period_start,
            period_end,
            change_date,
            total_days_in_period: total_days,
            days_used,
            days_remaining,
            unused_amount,
            prorated_amount: Decimal::ZERO,
            net_amount,
            proration_type: if net_amount < Decimal::ZERO {
                ProrationType::Credit
            } else {
                ProrationType::None
            },
            currency,
            applies: net_amount < Decimal::ZERO,
            reason: None,
            explanation: format!(
                "refund of {} unused days at {}/day: {}",
                days_remaining, daily_old, net_amount
            ),
        }
    }

    /// Per-day rate at four decimal places, half-up
    fn daily_rate(amount: Decimal, total_days: i64) -> Decimal {
        (amount / Decimal::from(total_days))
            .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Component amounts truncate to cents
    fn to_cents(amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(2, RoundingStrategy::ToZero)
    }
}
