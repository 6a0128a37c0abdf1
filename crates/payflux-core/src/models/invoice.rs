//! Subscription invoice model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Currency;

/// Invoice status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "invoice_status", rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Awaiting first payment attempt
    Pending,
    /// A payment attempt is in flight
    Processing,
    Paid,
    /// Last attempt failed; a retry may be scheduled
    Failed,
    /// Abandoned (dunning exhausted or subscription cancelled)
    Cancelled,
}

/// What the invoice bills for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "invoice_type", rename_all = "snake_case")]
pub enum InvoiceType {
    /// Regular recurring charge for a billing period
    Bill,
    /// One-time setup fee
    Setup,
    /// Proration charge from a mid-period plan change
    Prorate,
    /// Negative-amount ledger entry from a downgrade or prorated refund,
    /// deducted from the next regular invoice
    Credit,
}

/// Subscription invoice
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionInvoice {
    pub id: Uuid,
    /// Human-facing unique number, e.g. INV-000042
    pub number: String,
    pub subscription_id: Uuid,
    pub invoice_type: InvoiceType,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: InvoiceStatus,

    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub due_date: DateTime<Utc>,

    pub payment_attempts: i32,
    pub next_payment_attempt: Option<DateTime<Utc>>,

    pub transaction_id: Option<Uuid>,
    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionInvoice {
    pub fn is_open(&self) -> bool {
        matches!(self.status, InvoiceStatus::Pending | InvoiceStatus::Processing | InvoiceStatus::Failed)
    }

    pub fn is_credit(&self) -> bool {
        self.invoice_type == InvoiceType::Credit
    }
}

/// New invoice, before insertion (the repository assigns the number)
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub subscription_id: Uuid,
    pub invoice_type: InvoiceType,
    pub amount: Decimal,
    pub currency: Currency,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}
