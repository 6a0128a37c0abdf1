//! Processor adapter trait and intent-level request/response types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Address, Currency};
use crate::Result;

/// Processor environment, bound at adapter construction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorEnvironment {
    Sandbox,
    Production,
}

impl Default for ProcessorEnvironment {
    fn default() -> Self {
        ProcessorEnvironment::Sandbox
    }
}

impl ProcessorEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            ProcessorEnvironment::Sandbox => "https://apitest.authorize.net/xml/v1/request.api",
            ProcessorEnvironment::Production => "https://api.authorize.net/xml/v1/request.api",
        }
    }
}

impl std::fmt::Display for ProcessorEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorEnvironment::Sandbox => write!(f, "sandbox"),
            ProcessorEnvironment::Production => write!(f, "production"),
        }
    }
}

/// Raw card details supplied on a payment request, never persisted
#[derive(Debug, Clone)]
pub struct CardInput {
    pub number: String,
    pub expiry_month: u32,
    pub expiry_year: u32,
    pub cvv: String,
    pub cardholder_name: String,
}

impl CardInput {
    /// Masked rendering safe for request blobs and logs
    pub fn masked_number(&self) -> String {
        let digits: String = self.number.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= 4 {
            format!("****{}", &digits[digits.len() - 4..])
        } else {
            "****".to_string()
        }
    }
}

/// How the charge is funded
#[derive(Debug, Clone)]
pub enum PaymentInstrument {
    Card(CardInput),
    /// Stored customer profile at the processor
    Profile {
        profile_id: String,
        payment_profile_id: String,
    },
    /// Opaque processor token
    Token(String),
}

/// Billing contact forwarded to the processor
#[derive(Debug, Clone, Default)]
pub struct BillingContact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<Address>,
}

/// Intent-level request for authorize/purchase
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub amount: Decimal,
    pub currency: Currency,
    pub instrument: PaymentInstrument,
    pub billing: Option<BillingContact>,
    pub invoice_number: Option<String>,
    pub correlation_id: String,
}

/// Recurring billing subscription request (processor-side ARB)
#[derive(Debug, Clone)]
pub struct RecurringRequest {
    pub amount: Decimal,
    pub currency: Currency,
    pub interval_days: u32,
    pub start_date: DateTime<Utc>,
    pub instrument: PaymentInstrument,
    pub billing: Option<BillingContact>,
}

/// Successful processor response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub external_id: String,
    pub auth_code: Option<String>,
    pub avs_result: Option<String>,
    pub cvv_result: Option<String>,
    pub settle_amount: Option<Decimal>,
}

/// Tagged processor outcome
///
/// Downstream code branches on the variant, never on field presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Outcome {
    Approved(Approval),
    Declined {
        code: String,
        reason: String,
    },
    Error {
        code: String,
        message: String,
        transient: bool,
        /// Present when the processor assigned a transaction id before
        /// failing (e.g. held for review), enabling reconciliation
        external_id: Option<String>,
    },
}

impl Outcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, Outcome::Approved(_))
    }

    pub fn is_transient_error(&self) -> bool {
        matches!(self, Outcome::Error { transient: true, .. })
    }
}

/// Processor-side view of a transaction, used for reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    AuthorizedPendingCapture,
    CapturedPendingSettlement,
    SettledSuccessfully,
    Voided,
    Declined,
    Failed,
    UnderReview,
}

#[derive(Debug, Clone)]
pub struct RemoteTransaction {
    pub external_id: String,
    pub status: RemoteStatus,
    pub settle_amount: Option<Decimal>,
    pub response_code: Option<String>,
}

/// Processor adapter contract
///
/// Every call carries the adapter's configured deadline; a timeout is
/// reported as a transient `Outcome::Error`, never a panic.
#[async_trait]
pub trait ProcessorAdapter: Send + Sync {
    /// Reserve funds on the instrument
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<Outcome>;

    /// Authorize and capture in one step
    async fn purchase(&self, request: &AuthorizationRequest) -> Result<Outcome>;

    /// Capture a prior authorization, optionally for a lesser amount
    async fn capture(&self, external_id: &str, amount: Option<Decimal>) -> Result<Outcome>;

    /// Void a prior authorization
    async fn void(&self, external_id: &str) -> Result<Outcome>;

    /// Refund a settled transaction, optionally partially
    async fn refund(
        &self,
        external_id: &str,
        amount: Option<Decimal>,
        instrument: &PaymentInstrument,
    ) -> Result<Outcome>;

    /// Create a customer profile; returns the processor profile id
    async fn create_customer_profile(&self, contact: &BillingContact) -> Result<String>;

    /// Attach a payment profile to a customer profile
    async fn create_payment_profile(&self, profile_id: &str, card: &CardInput) -> Result<String>;

    /// Create a processor-side recurring billing schedule
    async fn create_recurring(&self, request: &RecurringRequest) -> Result<String>;

    /// Cancel a processor-side recurring billing schedule
    async fn cancel_recurring(&self, recurring_id: &str) -> Result<()>;

    /// Fetch the processor's view of a transaction
    async fn get_transaction(&self, external_id: &str) -> Result<RemoteTransaction>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_base_urls_differ() {
        assert_ne!(
            ProcessorEnvironment::Sandbox.base_url(),
            ProcessorEnvironment::Production.base_url()
        );
    }

    #[test]
    fn test_masked_number() {
        let card = CardInput {
            number: "4111 1111 1111 1111".to_string(),
            expiry_month: 12,
            expiry_year: 2030,
            cvv: "123".to_string(),
            cardholder_name: "Jo Bloggs".to_string(),
        };
        assert_eq!(card.masked_number(), "****1111");
    }

    #[test]
    fn test_outcome_variants() {
        let approved = Outcome::Approved(Approval {
            external_id: "123".to_string(),
            auth_code: Some("OK".to_string()),
            avs_result: None,
            cvv_result: None,
            settle_amount: None,
        });
        assert!(approved.is_approved());
        assert!(!approved.is_transient_error());

        let transient = Outcome::Error {
            code: "E00001".to_string(),
            message: "gateway busy".to_string(),
            transient: true,
            external_id: None,
        };
        assert!(transient.is_transient_error());
    }
}
