//! Payment orchestration
//!
//! [`orchestrator::PaymentOrchestrator`] drives the payment state machine
//! over the processor adapter with idempotency and ledger writes.

pub mod orchestrator;
pub mod validation;

pub use orchestrator::PaymentOrchestrator;
pub use validation::validate_payment_method;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Currency, CustomerInput, PaymentMethodType, PaymentStatus, TransactionType};

/// Payment method details supplied on a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethodInput {
    #[serde(rename = "type")]
    pub method_type: PaymentMethodType,

    // Card fields, required when method_type == Card
    pub card_number: Option<String>,
    pub expiry_month: Option<u32>,
    pub expiry_year: Option<u32>,
    pub cvv: Option<String>,
    pub cardholder_name: Option<String>,

    /// Processor token, required when method_type == Token
    pub token: Option<String>,
}

impl PaymentMethodInput {
    /// Last four digits of the card number, if present
    pub fn card_last_four(&self) -> Option<String> {
        self.card_number.as_ref().map(|n| {
            let digits: String = n.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() >= 4 {
                digits[digits.len() - 4..].to_string()
            } else {
                digits
            }
        })
    }
}

/// Charge request accepted by purchase/authorize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub currency: Currency,
    pub payment_method: PaymentMethodInput,
    pub customer: CustomerInput,
    pub order_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub correlation_id: Option<String>,
}

/// Follow-up request against a prior transaction (capture/void/refund)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpRequest {
    pub transaction_id: Uuid,
    pub amount: Option<Decimal>,
    pub idempotency_key: Option<String>,
}

/// Response returned for every payment operation
///
/// Stored verbatim by the idempotency layer, so replays are byte-for-byte.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentResponse {
    pub transaction_id: Uuid,
    pub external_processor_id: Option<String>,
    pub transaction_type: TransactionType,
    pub status: PaymentStatus,
    pub approved: bool,
    pub amount: Decimal,
    pub currency: Currency,
    pub auth_code: Option<String>,
    pub avs_result: Option<String>,
    pub cvv_result: Option<String>,
    pub response_code: Option<String>,
    pub message: String,
    pub correlation_id: String,
}
