//! Transaction ledger model and payment state machine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Currency;

/// Transaction type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "transaction_type", rename_all = "snake_case")]
pub enum TransactionType {
    Authorize,
    Capture,
    Void,
    Refund,
    PartialRefund,
    Purchase,
}

/// Payment status
///
/// Transitions only follow the edges encoded in [`PaymentStatus::can_transition_to`].
/// Terminal statuses never mutate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Captured,
    Settled,
    Voided,
    Refunded,
    PartiallyRefunded,
    Failed,
    PendingReview,
}

impl PaymentStatus {
    /// Terminal statuses admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Voided | PaymentStatus::Refunded)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match self {
            // A purchase settles straight from pending, capture/void operation
            // rows resolve from pending, and fraud holds go to review
            Pending => matches!(next, Authorized | Captured | Settled | Voided | Failed | PendingReview),
            Authorized => matches!(next, Captured | Settled | Voided | Failed),
            Captured => matches!(next, Settled | PartiallyRefunded | Refunded | PendingReview),
            Settled => matches!(next, PartiallyRefunded | Refunded | PendingReview),
            PartiallyRefunded => matches!(next, PartiallyRefunded | Refunded),
            PendingReview => matches!(next, Settled | Failed),
            Failed | Voided | Refunded => false,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Settled => "settled",
            PaymentStatus::Voided => "voided",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::PendingReview => "pending_review",
        };
        write!(f, "{}", s)
    }
}

/// Transaction ledger entry
///
/// `parent_id` links captures/voids/refunds to their originating
/// authorization or purchase. Rows are immutable once status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub external_processor_id: Option<String>,
    pub parent_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub idempotency_key: Option<String>,
    pub correlation_id: String,
    pub auth_code: Option<String>,
    pub avs_result: Option<String>,
    pub cvv_result: Option<String>,
    pub response_code: Option<String>,
    pub failure_reason: Option<String>,
    pub request_blob: sqlx::types::Json<serde_json::Value>,
    pub response_blob: Option<sqlx::types::Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn is_refund(&self) -> bool {
        matches!(self.transaction_type, TransactionType::Refund | TransactionType::PartialRefund)
    }

    /// Lowercase slug of the transaction type, for event names
    pub fn transaction_type_slug(&self) -> &'static str {
        match self.transaction_type {
            TransactionType::Authorize => "authorize",
            TransactionType::Capture => "capture",
            TransactionType::Void => "void",
            TransactionType::Refund => "refund",
            TransactionType::PartialRefund => "partial_refund",
            TransactionType::Purchase => "purchase",
        }
    }
}

/// New ledger row, before insertion
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub parent_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub currency: Currency,
    pub idempotency_key: Option<String>,
    pub correlation_id: String,
    pub request_blob: serde_json::Value,
}

/// Outcome fields recorded against a transaction after the processor call
#[derive(Debug, Clone, Default)]
pub struct TransactionOutcome {
    pub external_processor_id: Option<String>,
    pub auth_code: Option<String>,
    pub avs_result: Option<String>,
    pub cvv_result: Option<String>,
    pub response_code: Option<String>,
    pub failure_reason: Option<String>,
    pub response_blob: Option<serde_json::Value>,
}

/// Read-only transaction view returned by status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    pub id: Uuid,
    pub external_processor_id: Option<String>,
    pub parent_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub auth_code: Option<String>,
    pub avs_result: Option<String>,
    pub cvv_result: Option<String>,
    pub refunded_amount: Decimal,
    pub available_refund_amount: Decimal,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Voided.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(!PaymentStatus::Settled.is_terminal());
        assert!(!PaymentStatus::PartiallyRefunded.is_terminal());
    }

    #[test]
    fn test_legal_edges() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Authorized));
        assert!(Pending.can_transition_to(Settled));
        assert!(Pending.can_transition_to(Captured));
        assert!(Pending.can_transition_to(Voided));
        assert!(Pending.can_transition_to(Failed));
        assert!(Authorized.can_transition_to(Captured));
        assert!(Authorized.can_transition_to(Voided));
        assert!(Captured.can_transition_to(Settled));
        assert!(Settled.can_transition_to(PartiallyRefunded));
        assert!(PartiallyRefunded.can_transition_to(Refunded));
        assert!(PendingReview.can_transition_to(Settled));
    }

    #[test]
    fn test_illegal_edges() {
        use PaymentStatus::*;
        assert!(!Refunded.can_transition_to(Settled));
        assert!(!Voided.can_transition_to(Captured));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Settled.can_transition_to(Authorized));
        assert!(!Captured.can_transition_to(Voided));
    }

    #[test]
    fn test_terminal_statuses_have_no_successors() {
        use PaymentStatus::*;
        let all = [
            Pending, Authorized, Captured, Settled, Voided, Refunded,
            PartiallyRefunded, Failed, PendingReview,
        ];
        for terminal in all.iter().filter(|s| s.is_terminal()) {
            for next in &all {
                assert!(
                    !terminal.can_transition_to(*next),
                    "{:?} -> {:?} should be illegal",
                    terminal,
                    next
                );
            }
        }
    }
}
