//! In-memory repository and processor fakes for end-to-end scenario tests.
//!
//! Each fake mirrors the semantics of its PostgreSQL counterpart closely
//! enough for the state-machine and scheduling logic to be exercised
//! without a database: guarded transitions, unique keys, aggregates.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use payflux_core::error::{Error, Result};
use payflux_core::models::*;
use payflux_core::processor::adapter::*;
use payflux_core::repository::idempotency_repository::{ClaimOutcome, IdempotencyScope, IdempotencyStore};
use payflux_core::repository::webhook_repository::NewWebhook;
use payflux_core::repository::{
    CustomerRepository, InvoiceRepository, PlanRepository, SubscriptionRepository,
    TransactionRepository, WebhookRepository,
};

// --- customers ---

#[derive(Default)]
pub struct MemCustomers {
    customers: Mutex<Vec<Customer>>,
    methods: Mutex<Vec<PaymentMethod>>,
}

impl MemCustomers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a customer + stored token payment method, returning both ids
    pub fn seed_customer_with_method(&self, email: &str) -> (Uuid, Uuid) {
        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4(),
            external_reference: None,
            email: email.to_string(),
            first_name: "Test".to_string(),
            last_name: "Customer".to_string(),
            phone: None,
            billing_address: None,
            processor_profile_id: Some("profile-1".to_string()),
            active: true,
            created_at: now,
            updated_at: now,
        };
        let method = PaymentMethod {
            id: Uuid::new_v4(),
            customer_id: customer.id,
            method_type: PaymentMethodType::Token,
            token: "tok_test".to_string(),
            brand: Some("visa".to_string()),
            last_four: Some("1111".to_string()),
            expiry_month: Some(12),
            expiry_year: Some(2049),
            is_default: true,
            active: true,
            created_at: now,
            updated_at: now,
        };
        let ids = (customer.id, method.id);
        self.customers.lock().unwrap().push(customer);
        self.methods.lock().unwrap().push(method);
        ids
    }
}

#[async_trait]
impl CustomerRepository for MemCustomers {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Customer>> {
        Ok(self.customers.lock().unwrap().iter().find(|c| c.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>> {
        Ok(self
            .customers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create(&self, input: &CustomerInput) -> Result<Customer> {
        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4(),
            external_reference: input.external_reference.clone(),
            email: input.email.clone(),
            first_name: input.first_name.clone(),
            last_name: input.last_name.clone(),
            phone: input.phone.clone(),
            billing_address: input.billing_address.clone().map(sqlx::types::Json),
            processor_profile_id: None,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.customers.lock().unwrap().push(customer.clone());
        Ok(customer)
    }

    async fn set_processor_profile(&self, id: Uuid, profile_id: &str) -> Result<()> {
        let mut customers = self.customers.lock().unwrap();
        if let Some(customer) = customers.iter_mut().find(|c| c.id == id) {
            if customer.processor_profile_id.is_none() {
                customer.processor_profile_id = Some(profile_id.to_string());
            }
        }
        Ok(())
    }

    async fn find_payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>> {
        Ok(self.methods.lock().unwrap().iter().find(|m| m.id == id).cloned())
    }

    async fn create_payment_method(&self, request: &CreatePaymentMethodRequest) -> Result<PaymentMethod> {
        let now = Utc::now();
        let method = PaymentMethod {
            id: Uuid::new_v4(),
            customer_id: request.customer_id,
            method_type: request.method_type,
            token: request.token.clone(),
            brand: request.brand.clone(),
            last_four: request.last_four.clone(),
            expiry_month: request.expiry_month,
            expiry_year: request.expiry_year,
            is_default: request.is_default,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.methods.lock().unwrap().push(method.clone());
        Ok(method)
    }

    async fn list_payment_methods(&self, customer_id: Uuid) -> Result<Vec<PaymentMethod>> {
        Ok(self
            .methods
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.customer_id == customer_id && m.active)
            .cloned()
            .collect())
    }
}

// --- transactions ---

#[derive(Default)]
pub struct MemTransactions {
    rows: Mutex<Vec<Transaction>>,
}

impl MemTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Transaction> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionRepository for MemTransactions {
    async fn insert(&self, new: NewTransaction) -> Result<Transaction> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(key) = &new.idempotency_key {
            if rows.iter().any(|t| t.idempotency_key.as_deref() == Some(key)) {
                return Err(Error::idempotency_conflict("duplicate transaction idempotency key"));
            }
        }
        let transaction = Transaction {
            id: Uuid::new_v4(),
            external_processor_id: None,
            parent_id: new.parent_id,
            order_id: new.order_id,
            customer_id: new.customer_id,
            transaction_type: new.transaction_type,
            amount: new.amount,
            currency: new.currency,
            status: PaymentStatus::Pending,
            idempotency_key: new.idempotency_key,
            correlation_id: new.correlation_id,
            auth_code: None,
            avs_result: None,
            cvv_result: None,
            response_code: None,
            failure_reason: None,
            request_blob: sqlx::types::Json(new.request_blob),
            response_blob: None,
            created_at: Utc::now(),
            processed_at: None,
        };
        rows.push(transaction.clone());
        Ok(transaction)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.rows.lock().unwrap().iter().find(|t| t.id == id).cloned())
    }

    async fn find_by_processor_id(&self, external_id: &str) -> Result<Option<Transaction>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.external_processor_id.as_deref() == Some(external_id))
            .cloned())
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
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|t| t.id == id && t.status == from)
            .ok_or_else(|| Error::validation(format!("transaction {} is no longer in status {}", id, from)))?;

        row.status = to;
        apply_outcome_fields(row, outcome);
        row.processed_at = Some(Utc::now());
        Ok(row.clone())
    }

    async fn record_outcome(&self, id: Uuid, outcome: &TransactionOutcome) -> Result<Transaction> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::not_found(format!("transaction {}", id)))?;
        apply_outcome_fields(row, outcome);
        Ok(row.clone())
    }

    async fn refunded_amount(&self, parent_id: Uuid) -> Result<Decimal> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| {
                t.parent_id == Some(parent_id)
                    && t.is_refund()
                    && t.status == PaymentStatus::Settled
            })
            .map(|t| t.amount)
            .sum())
    }

    async fn list_children(&self, parent_id: Uuid) -> Result<Vec<Transaction>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<Transaction>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    async fn count_recent_by_customer(&self, customer_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| {
                t.customer_id == Some(customer_id)
                    && matches!(
                        t.transaction_type,
                        TransactionType::Purchase | TransactionType::Authorize
                    )
                    && t.created_at >= since
            })
            .count() as i64)
    }

    async fn find_stale_pending(&self, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<Transaction>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| {
                t.status == PaymentStatus::Pending
                    && t.external_processor_id.is_some()
                    && t.created_at < older_than
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn failure_stats(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(i64, i64)> {
        let rows = self.rows.lock().unwrap();
        let in_period: Vec<_> = rows
            .iter()
            .filter(|t| t.created_at >= from && t.created_at < to)
            .collect();
        let failed = in_period.iter().filter(|t| t.status == PaymentStatus::Failed).count() as i64;
        Ok((failed, in_period.len() as i64))
    }
}

fn apply_outcome_fields(row: &mut Transaction, outcome: &TransactionOutcome) {
    if let Some(v) = &outcome.external_processor_id {
        row.external_processor_id = Some(v.clone());
    }
    if let Some(v) = &outcome.auth_code {
        row.auth_code = Some(v.clone());
    }
    if let Some(v) = &outcome.avs_result {
        row.avs_result = Some(v.clone());
    }
    if let Some(v) = &outcome.cvv_result {
        row.cvv_result = Some(v.clone());
    }
    if let Some(v) = &outcome.response_code {
        row.response_code = Some(v.clone());
    }
    if let Some(v) = &outcome.failure_reason {
        row.failure_reason = Some(v.clone());
    }
    if let Some(v) = &outcome.response_blob {
        row.response_blob = Some(sqlx::types::Json(v.clone()));
    }
}

// --- idempotency ---

#[derive(Default)]
pub struct MemIdempotency {
    rows: Mutex<HashMap<(&'static str, String), (String, Option<serde_json::Value>)>>,
}

impl MemIdempotency {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemIdempotency {
    async fn claim(
        &self,
        scope: IdempotencyScope,
        key: &str,
        fingerprint: &str,
    ) -> Result<ClaimOutcome> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get(&(scope.as_str(), key.to_string())) {
            None => {
                rows.insert(
                    (scope.as_str(), key.to_string()),
                    (fingerprint.to_string(), None),
                );
                Ok(ClaimOutcome::Proceed)
            }
            Some((stored_fingerprint, response)) => {
                if stored_fingerprint != fingerprint {
                    return Err(Error::idempotency_conflict(format!(
                        "key {} was already used with a different request",
                        key
                    )));
                }
                match response {
                    Some(response) => Ok(ClaimOutcome::Replay(response.clone())),
                    None => Ok(ClaimOutcome::InFlight),
                }
            }
        }
    }

    async fn complete(
        &self,
        scope: IdempotencyScope,
        key: &str,
        response: &serde_json::Value,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(entry) = rows.get_mut(&(scope.as_str(), key.to_string())) {
            entry.1 = Some(response.clone());
        }
        Ok(())
    }

    async fn release(&self, scope: IdempotencyScope, key: &str) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some((_, None)) = rows.get(&(scope.as_str(), key.to_string())) {
            rows.remove(&(scope.as_str(), key.to_string()));
        }
        Ok(())
    }
}

// --- subscriptions ---

#[derive(Default)]
pub struct MemSubscriptions {
    rows: Mutex<Vec<Subscription>>,
}

impl MemSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionRepository for MemSubscriptions {
    async fn create(&self, subscription: &Subscription) -> Result<Subscription> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(key) = &subscription.idempotency_key {
            if rows
                .iter()
                .any(|s| s.customer_id == subscription.customer_id && s.idempotency_key.as_deref() == Some(key))
            {
                return Err(Error::idempotency_conflict(
                    "a subscription with this idempotency key already exists for the customer",
                ));
            }
        }
        rows.push(subscription.clone());
        Ok(subscription.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscription>> {
        Ok(self.rows.lock().unwrap().iter().find(|s| s.id == id).cloned())
    }

    async fn find_by_customer_and_key(
        &self,
        customer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.customer_id == customer_id && s.idempotency_key.as_deref() == Some(idempotency_key))
            .cloned())
    }

    async fn update(&self, subscription: &Subscription) -> Result<Subscription> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|s| s.id == subscription.id)
            .ok_or_else(|| Error::not_found(format!("subscription {}", subscription.id)))?;
        *row = subscription.clone();
        row.updated_at = Utc::now();
        Ok(row.clone())
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
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|s| s.id == id && s.status == from)
            .ok_or_else(|| Error::validation(format!("subscription {} is no longer in status {}", id, from)))?;
        row.status = to;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn list_by_customer(&self, customer_id: Uuid, page: &Pagination) -> Result<Vec<Subscription>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.customer_id == customer_id)
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .cloned()
            .collect())
    }

    async fn due_for_billing(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| {
                s.status == SubscriptionStatus::Active
                    && s.next_billing_date.map_or(false, |d| d <= now)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_trials_ending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| {
                s.status == SubscriptionStatus::Active
                    && s.trial_end.map_or(false, |end| end <= now && s.current_period_start < end)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_scheduled_cancellations(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| {
                !s.status.is_terminal() && s.scheduled_cancel_at.map_or(false, |at| at <= now)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_scheduled_plan_changes(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Subscription>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| {
                !s.status.is_terminal()
                    && s.scheduled_plan_code.is_some()
                    && s.scheduled_plan_change_at.map_or(false, |at| at <= now)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// --- invoices ---

#[derive(Default)]
pub struct MemInvoices {
    rows: Mutex<Vec<SubscriptionInvoice>>,
    sequence: AtomicUsize,
}

impl MemInvoices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<SubscriptionInvoice> {
        self.rows.lock().unwrap().clone()
    }

    /// Force an invoice's retry clock into the past so sweeps pick it up
    pub fn make_retry_due(&self, id: Uuid) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|i| i.id == id) {
            row.next_payment_attempt = Some(Utc::now() - chrono::Duration::minutes(1));
        }
    }
}

impl MemInvoices {
    fn build(&self, new: NewInvoice) -> SubscriptionInvoice {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        SubscriptionInvoice {
            id: Uuid::new_v4(),
            number: format!("INV-{:06}", seq),
            subscription_id: new.subscription_id,
            invoice_type: new.invoice_type,
            amount: new.amount,
            currency: new.currency,
            status: InvoiceStatus::Pending,
            period_start: new.period_start,
            period_end: new.period_end,
            due_date: new.due_date,
            payment_attempts: 0,
            next_payment_attempt: None,
            transaction_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl InvoiceRepository for MemInvoices {
    async fn create(&self, new: NewInvoice) -> Result<SubscriptionInvoice> {
        let invoice = self.build(new);
        self.rows.lock().unwrap().push(invoice.clone());
        Ok(invoice)
    }

    async fn create_if_absent(&self, new: NewInvoice) -> Result<Option<SubscriptionInvoice>> {
        // Mirror the partial unique index: one BILL invoice per
        // (subscription, period_start)
        {
            let rows = self.rows.lock().unwrap();
            if new.invoice_type == InvoiceType::Bill
                && rows.iter().any(|i| {
                    i.subscription_id == new.subscription_id
                        && i.period_start == new.period_start
                        && i.invoice_type == InvoiceType::Bill
                })
            {
                return Ok(None);
            }
        }
        let invoice = self.build(new);
        self.rows.lock().unwrap().push(invoice.clone());
        Ok(Some(invoice))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SubscriptionInvoice>> {
        Ok(self.rows.lock().unwrap().iter().find(|i| i.id == id).cloned())
    }

    async fn find_by_number(&self, number: &str) -> Result<Option<SubscriptionInvoice>> {
        Ok(self.rows.lock().unwrap().iter().find(|i| i.number == number).cloned())
    }

    async fn list_by_subscription(&self, subscription_id: Uuid) -> Result<Vec<SubscriptionInvoice>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.subscription_id == subscription_id)
            .cloned()
            .collect())
    }

    async fn find_for_period(
        &self,
        subscription_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<Option<SubscriptionInvoice>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|i| {
                i.subscription_id == subscription_id
                    && i.period_start == period_start
                    && i.invoice_type == InvoiceType::Bill
                    && matches!(
                        i.status,
                        InvoiceStatus::Pending
                            | InvoiceStatus::Processing
                            | InvoiceStatus::Paid
                            | InvoiceStatus::Failed
                    )
            })
            .cloned())
    }

    async fn mark_processing(&self, id: Uuid, from: InvoiceStatus) -> Result<SubscriptionInvoice> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|i| i.id == id && i.status == from)
            .ok_or_else(|| Error::validation(format!("invoice {} was claimed by another worker", id)))?;
        row.status = InvoiceStatus::Processing;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn mark_paid(&self, id: Uuid, transaction_id: Uuid) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|i| i.id == id) {
            row.status = InvoiceStatus::Paid;
            row.transaction_id = Some(transaction_id);
            row.next_payment_attempt = None;
            row.failure_reason = None;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
        attempts: i32,
        next_payment_attempt: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|i| i.id == id) {
            row.status = InvoiceStatus::Failed;
            row.failure_reason = Some(reason.to_string());
            row.payment_attempts = attempts;
            row.next_payment_attempt = next_payment_attempt;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|i| i.id == id) {
            row.status = InvoiceStatus::Cancelled;
            row.next_payment_attempt = None;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn due_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<SubscriptionInvoice>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|i| {
                i.status == InvoiceStatus::Pending
                    && i.invoice_type != InvoiceType::Credit
                    && i.due_date <= now
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn due_for_retry(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<SubscriptionInvoice>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|i| {
                i.status == InvoiceStatus::Failed
                    && i.next_payment_attempt.map_or(false, |at| at <= now)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn open_credit_total(&self, subscription_id: Uuid) -> Result<Decimal> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|i| {
                i.subscription_id == subscription_id
                    && i.invoice_type == InvoiceType::Credit
                    && i.status == InvoiceStatus::Pending
            })
            .map(|i| i.amount)
            .sum())
    }

    async fn consume_credits(&self, subscription_id: Uuid) -> Result<Decimal> {
        let mut rows = self.rows.lock().unwrap();
        let mut total = Decimal::ZERO;
        for row in rows.iter_mut().filter(|i| {
            i.subscription_id == subscription_id
                && i.invoice_type == InvoiceType::Credit
                && i.status == InvoiceStatus::Pending
        }) {
            total += row.amount;
            row.status = InvoiceStatus::Paid;
            row.updated_at = Utc::now();
        }
        Ok(total)
    }
}

// --- plans ---

#[derive(Default)]
pub struct MemPlans {
    rows: Mutex<Vec<SubscriptionPlan>>,
}

impl MemPlans {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, code: &str, amount: Decimal, unit: IntervalUnit, trial_days: i32) -> SubscriptionPlan {
        let now = Utc::now();
        let plan = SubscriptionPlan {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: code.to_string(),
            amount,
            currency: Currency::USD,
            interval_unit: unit,
            interval_count: 1,
            trial_days,
            setup_fee: Decimal::ZERO,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().unwrap().push(plan.clone());
        plan
    }
}

#[async_trait]
impl PlanRepository for MemPlans {
    async fn create(&self, request: &CreatePlanRequest) -> Result<SubscriptionPlan> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|p| p.code == request.code) {
            return Err(Error::validation(format!("plan code {} already exists", request.code)));
        }
        let now = Utc::now();
        let plan = SubscriptionPlan {
            id: Uuid::new_v4(),
            code: request.code.clone(),
            name: request.name.clone(),
            amount: request.amount,
            currency: request.currency,
            interval_unit: request.interval_unit,
            interval_count: request.interval_count,
            trial_days: request.trial_days,
            setup_fee: request.setup_fee,
            active: true,
            created_at: now,
            updated_at: now,
        };
        rows.push(plan.clone());
        Ok(plan)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<SubscriptionPlan>> {
        Ok(self.rows.lock().unwrap().iter().find(|p| p.code == code).cloned())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<SubscriptionPlan>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|p| !active_only || p.active)
            .cloned()
            .collect())
    }

    async fn deactivate(&self, code: &str) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let plan = rows
            .iter_mut()
            .find(|p| p.code == code)
            .ok_or_else(|| Error::not_found(format!("plan {}", code)))?;
        plan.active = false;
        Ok(())
    }

    async fn subscription_count(&self, _code: &str) -> Result<i64> {
        Ok(0)
    }
}

// --- webhooks ---

#[derive(Default)]
pub struct MemWebhooks {
    rows: Mutex<Vec<Webhook>>,
}

impl MemWebhooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Webhook> {
        self.rows.lock().unwrap().clone()
    }

    /// Force a delivery's next attempt into the past
    pub fn make_delivery_due(&self, id: Uuid) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|w| w.id == id) {
            row.next_attempt_at = Some(Utc::now() - chrono::Duration::minutes(1));
        }
    }
}

#[async_trait]
impl WebhookRepository for MemWebhooks {
    async fn insert(&self, new: NewWebhook) -> Result<Webhook> {
        let now = Utc::now();
        let webhook = Webhook {
            id: Uuid::new_v4(),
            direction: new.direction,
            event_type: new.event_type,
            event_id: new.event_id,
            endpoint_url: new.endpoint_url,
            status: new.status,
            attempts: 0,
            max_attempts: new.max_attempts,
            next_attempt_at: new.next_attempt_at,
            request_body: new.request_body,
            request_headers: sqlx::types::Json(new.request_headers),
            response_code: None,
            response_headers: None,
            response_body: None,
            correlation_id: new.correlation_id,
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().unwrap().push(webhook.clone());
        Ok(webhook)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Webhook>> {
        Ok(self.rows.lock().unwrap().iter().find(|w| w.id == id).cloned())
    }

    async fn inbound_event_exists(
        &self,
        event_id: &str,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.rows.lock().unwrap().iter().any(|w| {
            w.direction == WebhookDirection::Inbound
                && w.event_id == event_id
                && w.event_type == event_type
                && w.created_at >= since
        }))
    }

    async fn update_status(&self, id: Uuid, status: WebhookStatus) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|w| w.id == id) {
            row.status = status;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn claim_due_deliveries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Webhook>> {
        let mut rows = self.rows.lock().unwrap();
        let mut claimed = Vec::new();
        for row in rows.iter_mut() {
            if claimed.len() >= limit as usize {
                break;
            }
            if row.direction == WebhookDirection::Outbound
                && matches!(row.status, WebhookStatus::Pending | WebhookStatus::Retrying)
                && row.next_attempt_at.map_or(false, |at| at <= now)
            {
                row.status = WebhookStatus::Processing;
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn record_delivery_success(
        &self,
        id: Uuid,
        attempts: i32,
        response_code: i32,
        response_headers: serde_json::Value,
        response_body: &str,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|w| w.id == id) {
            row.status = WebhookStatus::Delivered;
            row.attempts = attempts;
            row.response_code = Some(response_code);
            row.response_headers = Some(sqlx::types::Json(response_headers));
            row.response_body = Some(response_body.to_string());
            row.next_attempt_at = None;
            row.updated_at = Utc::now();
        }
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
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|w| w.id == id) {
            row.status = WebhookStatus::Retrying;
            row.attempts = attempts;
            row.next_attempt_at = Some(next_attempt_at);
            row.response_code = response_code;
            row.response_body = response_body.map(|b| b.to_string());
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_delivery_failure(
        &self,
        id: Uuid,
        attempts: i32,
        response_code: Option<i32>,
        response_body: Option<&str>,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|w| w.id == id) {
            row.status = WebhookStatus::Failed;
            row.attempts = attempts;
            row.next_attempt_at = None;
            row.response_code = response_code;
            row.response_body = response_body.map(|b| b.to_string());
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn requeue_delivery(&self, id: Uuid, next_attempt_at: DateTime<Utc>) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|w| w.id == id) {
            row.status = WebhookStatus::Retrying;
            row.next_attempt_at = Some(next_attempt_at);
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn cleanup(
        &self,
        delivered_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|w| {
            !((w.status == WebhookStatus::Delivered && w.updated_at < delivered_before)
                || (w.status == WebhookStatus::Failed && w.updated_at < failed_before))
        });
        Ok((before - rows.len()) as u64)
    }
}

// --- processor ---

/// Scripted processor fake: outcomes are popped from a queue, defaulting to
/// approval with a fresh external id. Counts transaction-level calls so
/// tests can assert exactly-once submission.
pub struct ScriptedProcessor {
    outcomes: Mutex<VecDeque<Outcome>>,
    remote: Mutex<HashMap<String, RemoteTransaction>>,
    pub transaction_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    pub recurring_cancels: AtomicUsize,
    sequence: AtomicUsize,
}

impl Default for ScriptedProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            remote: Mutex::new(HashMap::new()),
            transaction_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            recurring_cancels: AtomicUsize::new(0),
            sequence: AtomicUsize::new(0),
        }
    }

    pub fn push_outcome(&self, outcome: Outcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn push_decline(&self, code: &str, reason: &str) {
        self.push_outcome(Outcome::Declined {
            code: code.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn push_transient_error(&self) {
        self.push_outcome(Outcome::Error {
            code: "19".to_string(),
            message: "try again shortly".to_string(),
            transient: true,
            external_id: None,
        });
    }

    pub fn push_held_for_review(&self, external_id: &str) {
        self.push_outcome(Outcome::Error {
            code: "252".to_string(),
            message: "held for review".to_string(),
            transient: true,
            external_id: Some(external_id.to_string()),
        });
    }

    pub fn set_remote(&self, external_id: &str, remote: RemoteTransaction) {
        self.remote.lock().unwrap().insert(external_id.to_string(), remote);
    }

    pub fn calls(&self) -> usize {
        self.transaction_calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Outcome {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes.lock().unwrap().pop_front().unwrap_or_else(|| {
            let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            Outcome::Approved(Approval {
                external_id: format!("ext-{}", seq),
                auth_code: Some("OK123".to_string()),
                avs_result: Some("Y".to_string()),
                cvv_result: Some("M".to_string()),
                settle_amount: None,
            })
        })
    }
}

#[async_trait]
impl ProcessorAdapter for ScriptedProcessor {
    async fn authorize(&self, _request: &AuthorizationRequest) -> Result<Outcome> {
        Ok(self.next_outcome())
    }

    async fn purchase(&self, _request: &AuthorizationRequest) -> Result<Outcome> {
        Ok(self.next_outcome())
    }

    async fn capture(&self, _external_id: &str, _amount: Option<Decimal>) -> Result<Outcome> {
        Ok(self.next_outcome())
    }

    async fn void(&self, _external_id: &str) -> Result<Outcome> {
        Ok(self.next_outcome())
    }

    async fn refund(
        &self,
        _external_id: &str,
        _amount: Option<Decimal>,
        _instrument: &PaymentInstrument,
    ) -> Result<Outcome> {
        Ok(self.next_outcome())
    }

    async fn create_customer_profile(&self, _contact: &BillingContact) -> Result<String> {
        let seq = self.profile_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("profile-{}", seq))
    }

    async fn create_payment_profile(&self, _profile_id: &str, _card: &CardInput) -> Result<String> {
        Ok("payment-profile-1".to_string())
    }

    async fn create_recurring(&self, _request: &RecurringRequest) -> Result<String> {
        Ok("arb-1".to_string())
    }

    async fn cancel_recurring(&self, _recurring_id: &str) -> Result<()> {
        self.recurring_cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_transaction(&self, external_id: &str) -> Result<RemoteTransaction> {
        self.remote
            .lock()
            .unwrap()
            .get(external_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("transaction {} not found at processor", external_id)))
    }
}
