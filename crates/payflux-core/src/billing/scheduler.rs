//! Billing scheduler sweeps
//!
//! Three periodic sweeps drive recurring billing: hourly due billing, the
//! daily dunning retry pass, and the daily lifecycle pass (trial
//! conversions, scheduled cancellations and plan changes). A fourth sweep
//! reconciles transactions stuck PENDING against the processor.
//!
//! Every sweep processes entities one at a time; a failure on one
//! subscription is logged and never aborts the rest of the sweep.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::billing::engine::SubscriptionEngine;
use crate::config::BillingConfig;
use crate::models::{
    CancelSubscriptionRequest, CancelTiming, Customer, CustomerInput, InvoiceStatus, InvoiceType,
    NewInvoice, PaymentMethod, PaymentMethodType, Subscription, SubscriptionInvoice,
    SubscriptionStatus,
};
use crate::payment::{PaymentMethodInput, PaymentOrchestrator, PaymentRequest};
use crate::repository::{
    CustomerRepository, InvoiceRepository, SubscriptionRepository, TransactionRepository,
};
use crate::{Error, Result};

const SWEEP_BATCH: i64 = 500;
/// PENDING transactions older than this get a get-transaction backfill
const RECONCILE_AFTER_MINUTES: i64 = 60;

/// Counters reported by each sweep
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub examined: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Outcome of a single invoice payment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Paid,
    Failed { attempts: i32 },
}

pub struct BillingScheduler {
    engine: Arc<SubscriptionEngine>,
    orchestrator: Arc<PaymentOrchestrator>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    customers: Arc<dyn CustomerRepository>,
    transactions: Arc<dyn TransactionRepository>,
    config: BillingConfig,
}

impl BillingScheduler {
    pub fn new(
        engine: Arc<SubscriptionEngine>,
        orchestrator: Arc<PaymentOrchestrator>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        customers: Arc<dyn CustomerRepository>,
        transactions: Arc<dyn TransactionRepository>,
        config: BillingConfig,
    ) -> Self {
        Self {
            engine,
            orchestrator,
            subscriptions,
            invoices,
            customers,
            transactions,
            config,
        }
    }

    /// Hourly sweep: bill subscriptions whose period has come due, and
    /// collect one-off invoices (setup fees, proration charges) past due
    pub async fn process_due_billing(&self) -> Result<SweepStats> {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        for subscription in self.engine.due_for_billing(now, SWEEP_BATCH).await? {
            stats.examined += 1;
            match self.bill_subscription(subscription, now).await {
                Ok(true) => stats.succeeded += 1,
                Ok(false) => stats.failed += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!(error = %e, "due billing failed for subscription");
                }
            }
        }

        for invoice in self.invoices.due_pending(now, SWEEP_BATCH).await? {
            stats.examined += 1;
            match self.attempt_payment(&invoice).await {
                Ok(AttemptOutcome::Paid) => stats.succeeded += 1,
                Ok(AttemptOutcome::Failed { .. }) => stats.failed += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!(invoice = %invoice.number, error = %e, "pending invoice collection failed");
                }
            }
        }

        info!(
            examined = stats.examined,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "due billing sweep complete"
        );
        Ok(stats)
    }

    /// Daily dunning sweep: retry failed invoices on the configured
    /// schedule, cancelling the subscription once attempts are exhausted
    pub async fn retry_failed_payments(&self) -> Result<SweepStats> {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        for invoice in self.invoices.due_for_retry(now, SWEEP_BATCH).await? {
            stats.examined += 1;
            match self.retry_invoice(invoice).await {
                Ok(true) => stats.succeeded += 1,
                Ok(false) => stats.failed += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!(error = %e, "payment retry failed");
                }
            }
        }

        info!(
            examined = stats.examined,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "dunning retry sweep complete"
        );
        Ok(stats)
    }

    /// Daily lifecycle sweep: trial conversions, scheduled cancellations
    /// and scheduled plan changes
    pub async fn run_lifecycle(&self) -> Result<SweepStats> {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        for mut subscription in self.subscriptions.find_trials_ending(now, SWEEP_BATCH).await? {
            stats.examined += 1;
            match self.convert_and_bill_trial(&mut subscription).await {
                Ok(()) => stats.succeeded += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!(subscription_id = %subscription.id, error = %e, "trial conversion failed");
                }
            }
        }

        for subscription in self.subscriptions.find_scheduled_cancellations(now, SWEEP_BATCH).await? {
            stats.examined += 1;
            let id = subscription.id;
            match self.engine.enact_scheduled_cancellation(subscription).await {
                Ok(_) => stats.succeeded += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!(subscription_id = %id, error = %e, "scheduled cancellation failed");
                }
            }
        }

        for subscription in self.subscriptions.find_scheduled_plan_changes(now, SWEEP_BATCH).await? {
            stats.examined += 1;
            let id = subscription.id;
            match self.engine.enact_scheduled_plan_change(subscription).await {
                Ok(_) => stats.succeeded += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!(subscription_id = %id, error = %e, "scheduled plan change failed");
                }
            }
        }

        info!(
            examined = stats.examined,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "lifecycle sweep complete"
        );
        Ok(stats)
    }

    /// Backfill sweep: ask the processor for the truth on transactions that
    /// have sat PENDING past the reconciliation threshold
    pub async fn reconcile_pending(&self) -> Result<SweepStats> {
        let cutoff = Utc::now() - Duration::minutes(RECONCILE_AFTER_MINUTES);
        let mut stats = SweepStats::default();

        for transaction in self.transactions.find_stale_pending(cutoff, SWEEP_BATCH).await? {
            stats.examined += 1;
            match self.orchestrator.reconcile(&transaction).await {
                Ok(()) => stats.succeeded += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(transaction_id = %transaction.id, error = %e, "reconciliation failed");
                }
            }
        }

        Ok(stats)
    }

    /// Attempt payment for an invoice through the orchestrator.
    ///
    /// The idempotency key is suffixed with the attempt ordinal, so a crashed
    /// attempt can never double-charge and each retry is a fresh submission.
    pub async fn attempt_payment(&self, invoice: &SubscriptionInvoice) -> Result<AttemptOutcome> {
        let claimed = self.invoices.mark_processing(invoice.id, invoice.status).await?;

        let subscription = self
            .subscriptions
            .find_by_id(claimed.subscription_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("subscription {}", claimed.subscription_id)))?;

        if !matches!(
            subscription.status,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        ) {
            self.invoices.mark_cancelled(claimed.id).await?;
            return Err(Error::validation(format!(
                "subscription {} is not billable (status: {})",
                subscription.id, subscription.status
            )));
        }

        let customer = self
            .customers
            .find_by_id(subscription.customer_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("customer {}", subscription.customer_id)))?;
        let method = self
            .customers
            .find_payment_method(subscription.payment_method_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("payment method {}", subscription.payment_method_id)))?;

        let request = Self::billing_request(&claimed, &customer, &method);

        let reason = match self.orchestrator.billing_purchase(request).await {
            Ok(response) if response.approved => {
                self.invoices.mark_paid(claimed.id, response.transaction_id).await?;
                info!(invoice = %claimed.number, "invoice paid");
                return Ok(AttemptOutcome::Paid);
            }
            Ok(response) => response.message,
            Err(e) => e.to_string(),
        };
        let prior_attempts = claimed.payment_attempts;
        let attempts = prior_attempts + 1;
        let delay_index = (prior_attempts as usize).min(self.config.retry_delay_days.len() - 1);
        let next_attempt = Utc::now() + Duration::days(self.config.retry_delay_days[delay_index]);

        self.invoices
            .mark_failed(claimed.id, &reason, attempts, Some(next_attempt))
            .await?;

        warn!(
            invoice = %claimed.number,
            attempts,
            next_attempt = %next_attempt,
            reason = %reason,
            "invoice payment failed"
        );

        // First failure moves the subscription into dunning
        if subscription.status == SubscriptionStatus::Active {
            self.subscriptions
                .transition_status(subscription.id, SubscriptionStatus::Active, SubscriptionStatus::PastDue)
                .await?;
        }

        Ok(AttemptOutcome::Failed { attempts })
    }

    // --- internals ---

    /// Returns Ok(true) when the period was billed and advanced
    async fn bill_subscription(&self, mut subscription: Subscription, now: DateTime<Utc>) -> Result<bool> {
        // An invoice may already cover this period (crash recovery, races)
        if let Some(existing) = self
            .invoices
            .find_for_period(subscription.id, subscription.current_period_start)
            .await?
        {
            return match existing.status {
                InvoiceStatus::Paid => {
                    self.engine.advance_period(&mut subscription).await?;
                    Ok(true)
                }
                _ => Ok(false),
            };
        }

        let plan = self.engine.plan(&subscription.plan_code).await?;
        let amount = self.engine.next_bill_amount(&subscription, &plan).await?;

        // The insert is the period claim; losing it means another worker
        // billed this period between our select and now
        let Some(invoice) = self
            .invoices
            .create_if_absent(NewInvoice {
                subscription_id: subscription.id,
                invoice_type: InvoiceType::Bill,
                amount,
                currency: plan.currency,
                period_start: subscription.current_period_start,
                period_end: subscription.current_period_end,
                due_date: now + Duration::days(self.config.grace_period_days),
            })
            .await?
        else {
            warn!(
                subscription_id = %subscription.id,
                "billing period already claimed by another worker"
            );
            return Ok(false);
        };

        match self.attempt_payment(&invoice).await? {
            AttemptOutcome::Paid => {
                self.engine.advance_period(&mut subscription).await?;
                Ok(true)
            }
            AttemptOutcome::Failed { .. } => Ok(false),
        }
    }

    async fn retry_invoice(&self, invoice: SubscriptionInvoice) -> Result<bool> {
        let subscription = self
            .subscriptions
            .find_by_id(invoice.subscription_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("subscription {}", invoice.subscription_id)))?;

        if !matches!(
            subscription.status,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        ) {
            self.invoices.mark_cancelled(invoice.id).await?;
            return Ok(false);
        }

        // Termination rule: the schedule is exhausted, stop dunning
        if invoice.payment_attempts >= self.config.max_retry_attempts {
            self.invoices.mark_cancelled(invoice.id).await?;
            self.engine
                .cancel(
                    subscription.id,
                    CancelSubscriptionRequest {
                        when: CancelTiming::Immediate,
                        cancel_at: None,
                        refund_prorated: false,
                        notes: Some("non-payment".to_string()),
                    },
                )
                .await?;
            warn!(
                subscription_id = %subscription.id,
                invoice = %invoice.number,
                "dunning exhausted, subscription cancelled for non-payment"
            );
            return Ok(false);
        }

        match self.attempt_payment(&invoice).await? {
            AttemptOutcome::Paid => {
                if subscription.status == SubscriptionStatus::PastDue {
                    self.subscriptions
                        .transition_status(
                            subscription.id,
                            SubscriptionStatus::PastDue,
                            SubscriptionStatus::Active,
                        )
                        .await?;
                    info!(subscription_id = %subscription.id, "payment recovered, subscription active");
                }
                Ok(true)
            }
            // The failure already scheduled its next retry; once the ladder
            // is exhausted the gate above enacts the termination rule on the
            // following sweep
            AttemptOutcome::Failed { .. } => Ok(false),
        }
    }

    async fn convert_and_bill_trial(&self, subscription: &mut Subscription) -> Result<()> {
        self.engine.convert_trial(subscription).await?;

        let plan = self.engine.plan(&subscription.plan_code).await?;
        let amount = self.engine.next_bill_amount(subscription, &plan).await?;

        let Some(invoice) = self
            .invoices
            .create_if_absent(NewInvoice {
                subscription_id: subscription.id,
                invoice_type: InvoiceType::Bill,
                amount,
                currency: plan.currency,
                period_start: subscription.current_period_start,
                period_end: subscription.current_period_end,
                due_date: Utc::now() + Duration::days(self.config.grace_period_days),
            })
            .await?
        else {
            warn!(
                subscription_id = %subscription.id,
                "first paid period already claimed by another worker"
            );
            return Ok(());
        };

        match self.attempt_payment(&invoice).await? {
            AttemptOutcome::Paid => Ok(()),
            AttemptOutcome::Failed { .. } => Ok(()),
        }
    }

    fn billing_request(
        invoice: &SubscriptionInvoice,
        customer: &Customer,
        method: &PaymentMethod,
    ) -> PaymentRequest {
        PaymentRequest {
            amount: invoice.amount,
            currency: invoice.currency,
            payment_method: PaymentMethodInput {
                method_type: PaymentMethodType::Token,
                card_number: None,
                expiry_month: None,
                expiry_year: None,
                cvv: None,
                cardholder_name: None,
                token: Some(method.token.clone()),
            },
            customer: CustomerInput {
                email: customer.email.clone(),
                first_name: customer.first_name.clone(),
                last_name: customer.last_name.clone(),
                phone: customer.phone.clone(),
                billing_address: customer.billing_address.clone().map(|a| a.0),
                external_reference: customer.external_reference.clone(),
            },
            order_id: None,
            idempotency_key: Some(format!(
                "billing:{}:attempt:{}",
                invoice.number,
                invoice.payment_attempts + 1
            )),
            correlation_id: Some(format!("billing-{}", invoice.number)),
        }
    }
}
