//! Order model with transaction-derived payment totals

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Currency;

/// Order entity
///
/// The stored row carries the pricing components only; paid/refunded/
/// outstanding amounts are derived from linked transactions.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Grand total owed for the order
    pub fn total(&self) -> Decimal {
        self.subtotal + self.tax + self.shipping - self.discount
    }
}

/// Payment totals aggregated over an order's transactions
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrderPaymentSummary {
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub refunded_amount: Decimal,
    pub outstanding_amount: Decimal,
}

impl OrderPaymentSummary {
    pub fn from_amounts(total: Decimal, paid: Decimal, refunded: Decimal) -> Self {
        Self {
            total,
            paid_amount: paid,
            refunded_amount: refunded,
            outstanding_amount: (total - paid + refunded).max(Decimal::ZERO),
        }
    }
}
