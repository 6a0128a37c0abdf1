//! Subscription lifecycle engine
//!
//! Owns subscription creation, plan changes, cancellation, pause/resume and
//! the calendar arithmetic for billing periods. The scheduler drives the
//! time-based pieces (due billing, trial conversion, scheduled changes)
//! through the helpers at the bottom.

use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::proration::{ProrationCalculator, ProrationResult, ProrationType};
use crate::config::BillingConfig;
use crate::models::{
    CancelSubscriptionRequest, CancelTiming, ChangeTiming, CreateSubscriptionRequest,
    IntervalUnit, InvoiceType, NewInvoice, Pagination, Subscription, SubscriptionPlan,
    SubscriptionStatus, UpdateSubscriptionRequest,
};
use crate::processor::ProcessorAdapter;
use crate::repository::{
    CustomerRepository, InvoiceRepository, PlanRepository, SubscriptionRepository,
};
use crate::{Error, Result};

/// Calendar-correct period addition. MONTH and YEAR clamp the day of month
/// to the target month's maximum (Jan 31 + 1 month = Feb 29 in a leap year).
pub fn advance(from: DateTime<Utc>, unit: IntervalUnit, count: i32) -> DateTime<Utc> {
    let count = count.max(1);
    match unit {
        IntervalUnit::Day => from + Duration::days(count as i64),
        IntervalUnit::Week => from + Duration::weeks(count as i64),
        IntervalUnit::Month => from
            .checked_add_months(Months::new(count as u32))
            .unwrap_or(from + Duration::days(30 * count as i64)),
        IntervalUnit::Year => from
            .checked_add_months(Months::new(12 * count as u32))
            .unwrap_or(from + Duration::days(365 * count as i64)),
    }
}

pub struct SubscriptionEngine {
    subscriptions: Arc<dyn SubscriptionRepository>,
    plans: Arc<dyn PlanRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    customers: Arc<dyn CustomerRepository>,
    processor: Arc<dyn ProcessorAdapter>,
    proration: ProrationCalculator,
    config: BillingConfig,
}

impl SubscriptionEngine {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        plans: Arc<dyn PlanRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        customers: Arc<dyn CustomerRepository>,
        processor: Arc<dyn ProcessorAdapter>,
        config: BillingConfig,
    ) -> Self {
        Self {
            subscriptions,
            plans,
            invoices,
            customers,
            processor,
            proration: ProrationCalculator::new(),
            config,
        }
    }

    /// Create a subscription.
    ///
    /// Idempotent per (customer, idempotency_key): a repeated request
    /// returns the subscription the first request created.
    pub async fn create(&self, request: CreateSubscriptionRequest) -> Result<Subscription> {
        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self
                .subscriptions
                .find_by_customer_and_key(request.customer_id, key)
                .await?
            {
                info!(subscription_id = %existing.id, "returning subscription for repeated create");
                return Ok(existing);
            }
        }

        let customer = self
            .customers
            .find_by_id(request.customer_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("customer {}", request.customer_id)))?;
        if !customer.active {
            return Err(Error::validation("customer is inactive"));
        }

        let plan = self.active_plan(&request.plan_code).await?;

        let payment_method = self
            .customers
            .find_payment_method(request.payment_method_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("payment method {}", request.payment_method_id)))?;
        if payment_method.customer_id != customer.id || !payment_method.active {
            return Err(Error::validation("payment method does not belong to the customer"));
        }

        let now = Utc::now();
        let start = request.start_date.unwrap_or(now);
        let anchor = request.billing_cycle_anchor.unwrap_or(start);

        let in_trial = request.start_trial && plan.has_trial();
        let (trial_start, trial_end, period_end) = if in_trial {
            let trial_end = now + Duration::days(plan.trial_days as i64);
            (Some(now), Some(trial_end), trial_end)
        } else {
            (None, None, advance(start, plan.interval_unit, plan.interval_count))
        };

        let subscription = Subscription {
            id: Uuid::new_v4(),
            customer_id: customer.id,
            plan_code: plan.code.clone(),
            payment_method_id: payment_method.id,
            status: SubscriptionStatus::Active,
            current_period_start: start,
            current_period_end: period_end,
            billing_cycle_anchor: anchor,
            trial_start,
            trial_end,
            next_billing_date: Some(period_end),
            cancelled_at: None,
            cancellation_reason: None,
            scheduled_cancel_at: None,
            scheduled_plan_code: None,
            scheduled_plan_change_at: None,
            recurring_profile_id: None,
            recurring_cancelled: false,
            idempotency_key: request.idempotency_key.clone(),
            metadata: sqlx::types::Json(request.metadata.clone()),
            created_at: now,
            updated_at: now,
        };

        let created = match self.subscriptions.create(&subscription).await {
            Ok(created) => created,
            // Lost a create race on the idempotency key: return the winner
            Err(Error::IdempotencyConflict(_)) if request.idempotency_key.is_some() => {
                let key = request.idempotency_key.as_deref().unwrap_or_default();
                return self
                    .subscriptions
                    .find_by_customer_and_key(request.customer_id, key)
                    .await?
                    .ok_or_else(|| Error::idempotency_conflict("subscription create race lost"));
            }
            Err(e) => return Err(e),
        };

        if plan.has_setup_fee() {
            self.invoices
                .create(NewInvoice {
                    subscription_id: created.id,
                    invoice_type: InvoiceType::Setup,
                    amount: plan.setup_fee,
                    currency: plan.currency,
                    period_start: start,
                    period_end,
                    due_date: now + Duration::days(1),
                })
                .await?;
        }

        if !in_trial && request.prorated {
            // Bill the first period immediately instead of at period end;
            // the claim insert keeps this safe against a concurrent sweep
            self.invoices
                .create_if_absent(NewInvoice {
                    subscription_id: created.id,
                    invoice_type: InvoiceType::Bill,
                    amount: plan.amount,
                    currency: plan.currency,
                    period_start: start,
                    period_end,
                    due_date: now + Duration::days(self.config.grace_period_days),
                })
                .await?;
        }

        info!(
            subscription_id = %created.id,
            plan = %plan.code,
            trial = in_trial,
            "subscription created"
        );
        Ok(created)
    }

    /// Apply a plan or payment-method change
    pub async fn update(&self, id: Uuid, request: UpdateSubscriptionRequest) -> Result<Subscription> {
        let mut subscription = self.get(id).await?;

        if subscription.status.is_terminal() {
            return Err(Error::validation("cannot update a cancelled subscription"));
        }

        if let Some(method_id) = request.payment_method_id {
            let method = self
                .customers
                .find_payment_method(method_id)
                .await?
                .ok_or_else(|| Error::not_found(format!("payment method {}", method_id)))?;
            if method.customer_id != subscription.customer_id || !method.active {
                return Err(Error::validation("payment method does not belong to the customer"));
            }
            subscription.payment_method_id = method_id;
        }

        if let Some(new_code) = &request.plan_code {
            if *new_code != subscription.plan_code {
                let current_plan = self.plan(&subscription.plan_code).await?;
                let new_plan = self.active_plan(new_code).await?;
                if new_plan.currency != current_plan.currency {
                    return Err(Error::validation("plan change cannot switch currency"));
                }

                match request.change_option {
                    ChangeTiming::Immediate => {
                        self.apply_plan_change_now(
                            &mut subscription,
                            &current_plan,
                            &new_plan,
                            request.prorated,
                            Utc::now(),
                        )
                        .await?;
                    }
                    ChangeTiming::EndOfPeriod => {
                        subscription.scheduled_plan_code = Some(new_plan.code.clone());
                        subscription.scheduled_plan_change_at = Some(subscription.current_period_end);
                    }
                }
            }
        }

        self.subscriptions.update(&subscription).await
    }

    /// Cancel a subscription now or at period end.
    /// Cancelling an already-cancelled subscription is a no-op.
    pub async fn cancel(&self, id: Uuid, request: CancelSubscriptionRequest) -> Result<Subscription> {
        let subscription = self.get(id).await?;

        if subscription.status == SubscriptionStatus::Cancelled {
            return Ok(subscription);
        }

        match request.when {
            CancelTiming::Immediate => {
                self.cancel_now(
                    subscription,
                    request.notes.as_deref().unwrap_or("customer request"),
                    request.refund_prorated,
                    Utc::now(),
                )
                .await
            }
            CancelTiming::EndOfPeriod => {
                let mut subscription = subscription;
                let effective = request
                    .cancel_at
                    .unwrap_or(subscription.current_period_end);
                subscription.scheduled_cancel_at = Some(effective);
                if let Some(notes) = &request.notes {
                    subscription.cancellation_reason = Some(notes.clone());
                }
                self.subscriptions.update(&subscription).await
            }
        }
    }

    /// Pause billing. Paused subscriptions are skipped by every sweep.
    /// A no-op on cancelled subscriptions.
    pub async fn pause(&self, id: Uuid) -> Result<Subscription> {
        let subscription = self.get(id).await?;

        match subscription.status {
            SubscriptionStatus::Cancelled => Ok(subscription),
            SubscriptionStatus::Active => {
                self.subscriptions
                    .transition_status(id, SubscriptionStatus::Active, SubscriptionStatus::Paused)
                    .await?;
                self.get(id).await
            }
            other => Err(Error::validation(format!(
                "only active subscriptions can be paused (status: {})",
                other
            ))),
        }
    }

    /// Resume a paused subscription, rolling the billing period forward if
    /// the pause outlived it. A no-op on cancelled subscriptions.
    pub async fn resume(&self, id: Uuid) -> Result<Subscription> {
        let mut subscription = self.get(id).await?;

        match subscription.status {
            SubscriptionStatus::Cancelled => Ok(subscription),
            SubscriptionStatus::Paused => {
                self.subscriptions
                    .transition_status(id, SubscriptionStatus::Paused, SubscriptionStatus::Active)
                    .await?;
                subscription.status = SubscriptionStatus::Active;

                let plan = self.plan(&subscription.plan_code).await?;
                let now = Utc::now();
                while subscription.current_period_end < now {
                    subscription.current_period_start = subscription.current_period_end;
                    subscription.current_period_end =
                        advance(subscription.current_period_end, plan.interval_unit, plan.interval_count);
                }
                subscription.next_billing_date = Some(subscription.current_period_end);

                self.subscriptions.update(&subscription).await
            }
            other => Err(Error::validation(format!(
                "only paused subscriptions can be resumed (status: {})",
                other
            ))),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Subscription> {
        self.subscriptions
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("subscription {}", id)))
    }

    pub async fn list_by_customer(&self, customer_id: Uuid, page: &Pagination) -> Result<Vec<Subscription>> {
        self.subscriptions.list_by_customer(customer_id, page).await
    }

    pub async fn due_for_billing(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>> {
        self.subscriptions.due_for_billing(now, limit).await
    }

    // --- scheduler-facing helpers ---

    /// Roll the subscription into its next billing period after a paid cycle
    pub async fn advance_period(&self, subscription: &mut Subscription) -> Result<()> {
        let plan = self.plan(&subscription.plan_code).await?;
        subscription.current_period_start = subscription.current_period_end;
        subscription.current_period_end = advance(
            subscription.current_period_end,
            plan.interval_unit,
            plan.interval_count,
        );
        subscription.next_billing_date = Some(subscription.current_period_end);
        self.subscriptions.update(subscription).await?;
        Ok(())
    }

    /// Move a subscription out of its trial into the first paid period
    pub async fn convert_trial(&self, subscription: &mut Subscription) -> Result<()> {
        let plan = self.plan(&subscription.plan_code).await?;
        let trial_end = subscription
            .trial_end
            .ok_or_else(|| Error::validation("subscription has no trial to convert"))?;

        subscription.current_period_start = trial_end;
        subscription.current_period_end = advance(trial_end, plan.interval_unit, plan.interval_count);
        subscription.next_billing_date = Some(subscription.current_period_end);
        self.subscriptions.update(subscription).await?;

        info!(subscription_id = %subscription.id, "trial converted to paid period");
        Ok(())
    }

    /// Enact a scheduled cancellation recorded by cancel(END_OF_PERIOD)
    pub async fn enact_scheduled_cancellation(&self, subscription: Subscription) -> Result<Subscription> {
        let reason = subscription
            .cancellation_reason
            .clone()
            .unwrap_or_else(|| "scheduled cancellation".to_string());
        self.cancel_now(subscription, &reason, false, Utc::now()).await
    }

    /// Enact a scheduled plan change recorded by update(END_OF_PERIOD).
    /// The new plan takes effect for the period starting at the change date.
    pub async fn enact_scheduled_plan_change(&self, mut subscription: Subscription) -> Result<Subscription> {
        let Some(new_code) = subscription.scheduled_plan_code.take() else {
            return Ok(subscription);
        };
        let change_at = subscription
            .scheduled_plan_change_at
            .take()
            .unwrap_or(subscription.current_period_end);

        let new_plan = match self.active_plan(&new_code).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(
                    subscription_id = %subscription.id,
                    plan = %new_code,
                    error = %e,
                    "scheduled plan change dropped: plan unavailable"
                );
                return self.subscriptions.update(&subscription).await;
            }
        };

        subscription.plan_code = new_plan.code.clone();
        subscription.current_period_start = change_at;
        subscription.current_period_end = advance(change_at, new_plan.interval_unit, new_plan.interval_count);
        subscription.next_billing_date = Some(subscription.current_period_end);

        info!(
            subscription_id = %subscription.id,
            plan = %new_plan.code,
            "scheduled plan change applied"
        );
        self.subscriptions.update(&subscription).await
    }

    /// Net recurring amount for the next bill: plan amount less any open
    /// credit ledger entries, floored at zero
    pub async fn next_bill_amount(&self, subscription: &Subscription, plan: &SubscriptionPlan) -> Result<Decimal> {
        let credit = self.invoices.consume_credits(subscription.id).await?;
        Ok((plan.amount + credit).max(Decimal::ZERO))
    }

    pub async fn plan(&self, code: &str) -> Result<SubscriptionPlan> {
        self.plans
            .find_by_code(code)
            .await?
            .ok_or_else(|| Error::not_found(format!("plan {}", code)))
    }

    // --- internals ---

    async fn active_plan(&self, code: &str) -> Result<SubscriptionPlan> {
        let plan = self.plan(code).await?;
        if !plan.active {
            return Err(Error::validation(format!("plan {} is not active", code)));
        }
        Ok(plan)
    }

    async fn apply_plan_change_now(
        &self,
        subscription: &mut Subscription,
        current_plan: &SubscriptionPlan,
        new_plan: &SubscriptionPlan,
        prorated: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if prorated {
            let proration = self.proration.calculate_plan_change(
                subscription.current_period_start,
                subscription.current_period_end,
                current_plan.amount,
                new_plan.amount,
                now,
                current_plan.currency,
            );
            self.record_proration(subscription, &proration, now).await?;

            // The prorated charge covers the remainder of the current period
            // at the new rate, so the cycle boundaries stay put
            subscription.plan_code = new_plan.code.clone();
        } else {
            // Unprorated immediate change restarts the cycle at the change date
            subscription.plan_code = new_plan.code.clone();
            subscription.current_period_start = now;
            subscription.current_period_end = advance(now, new_plan.interval_unit, new_plan.interval_count);
            subscription.next_billing_date = Some(subscription.current_period_end);
        }

        subscription.scheduled_plan_code = None;
        subscription.scheduled_plan_change_at = None;
        Ok(())
    }

    async fn record_proration(
        &self,
        subscription: &Subscription,
        proration: &ProrationResult,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !proration.applies {
            return Ok(());
        }

        match proration.proration_type {
            ProrationType::Charge => {
                self.invoices
                    .create(NewInvoice {
                        subscription_id: subscription.id,
                        invoice_type: InvoiceType::Prorate,
                        amount: proration.net_amount,
                        currency: proration.currency,
                        period_start: proration.change_date,
                        period_end: proration.period_end,
                        due_date: now + Duration::days(1),
                    })
                    .await?;
            }
            ProrationType::Credit => {
                // Real ledger entry; the next regular invoice deducts it
                self.invoices
                    .create(NewInvoice {
                        subscription_id: subscription.id,
                        invoice_type: InvoiceType::Credit,
                        amount: proration.net_amount,
                        currency: proration.currency,
                        period_start: proration.change_date,
                        period_end: proration.period_end,
                        due_date: now,
                    })
                    .await?;
            }
            ProrationType::None => {}
        }
        Ok(())
    }

    async fn cancel_now(
        &self,
        mut subscription: Subscription,
        reason: &str,
        refund_prorated: bool,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let from = subscription.status;
        if !from.can_transition_to(SubscriptionStatus::Cancelled) {
            return Err(Error::validation(format!(
                "subscription {} cannot be cancelled from {}",
                subscription.id, from
            )));
        }

        if refund_prorated {
            let plan = self.plan(&subscription.plan_code).await?;
            let refund = self.proration.calculate_cancellation_refund(
                subscription.current_period_start,
                subscription.current_period_end,
                plan.amount,
                now,
                plan.currency,
            );
            self.record_proration(&subscription, &refund, now).await?;
        }

        // Abandon open invoices so dunning stops
        for invoice in self.invoices.list_by_subscription(subscription.id).await? {
            if invoice.is_open() && !invoice.is_credit() {
                self.invoices.mark_cancelled(invoice.id).await?;
            }
        }

        // Cancel the processor-side recurring schedule at most once
        if let Some(profile) = subscription.recurring_profile_id.clone() {
            if !subscription.recurring_cancelled {
                match self.processor.cancel_recurring(&profile).await {
                    Ok(()) => subscription.recurring_cancelled = true,
                    Err(e) => {
                        warn!(
                            subscription_id = %subscription.id,
                            error = %e,
                            "processor recurring cancellation failed"
                        );
                    }
                }
            }
        }

        subscription.status = SubscriptionStatus::Cancelled;
        subscription.cancelled_at = Some(now);
        subscription.cancellation_reason = Some(reason.to_string());
        subscription.next_billing_date = None;
        subscription.scheduled_cancel_at = None;
        subscription.scheduled_plan_code = None;
        subscription.scheduled_plan_change_at = None;

        let updated = self.subscriptions.update(&subscription).await?;
        info!(subscription_id = %updated.id, reason = %reason, "subscription cancelled");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_advance_days_and_weeks() {
        let base = date(2024, 1, 15);
        assert_eq!(advance(base, IntervalUnit::Day, 10), date(2024, 1, 25));
        assert_eq!(advance(base, IntervalUnit::Week, 2), date(2024, 1, 29));
    }

    #[test]
    fn test_advance_month_clamps_day() {
        // Jan 31 + 1 month lands on the last day of February
        assert_eq!(advance(date(2024, 1, 31), IntervalUnit::Month, 1), date(2024, 2, 29));
        assert_eq!(advance(date(2023, 1, 31), IntervalUnit::Month, 1), date(2023, 2, 28));
        assert_eq!(advance(date(2024, 3, 31), IntervalUnit::Month, 1), date(2024, 4, 30));
    }

    #[test]
    fn test_advance_multi_month() {
        assert_eq!(advance(date(2024, 1, 15), IntervalUnit::Month, 3), date(2024, 4, 15));
    }

    #[test]
    fn test_advance_year_handles_leap_day() {
        assert_eq!(advance(date(2024, 2, 29), IntervalUnit::Year, 1), date(2025, 2, 28));
        assert_eq!(advance(date(2024, 6, 1), IntervalUnit::Year, 2), date(2026, 6, 1));
    }
}
