//! Customer and stored payment method models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::Address;

/// Customer entity
///
/// Created on the first payment seen for an email address.
/// `processor_profile_id` is set lazily after the profile is created at the
/// processor and never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub external_reference: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub billing_address: Option<sqlx::types::Json<Address>>,
    pub processor_profile_id: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    pub fn has_processor_profile(&self) -> bool {
        self.processor_profile_id.is_some()
    }
}

/// Payment method type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "payment_method_type", rename_all = "snake_case")]
pub enum PaymentMethodType {
    /// Raw card details, tokenized at the processor before storage
    Card,
    /// Processor-issued token referencing a stored instrument
    Token,
    BankAccount,
}

/// Stored payment method
///
/// The core never persists PAN/CVV; `token` is the processor reference.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub method_type: PaymentMethodType,
    pub token: String,
    pub brand: Option<String>,
    pub last_four: Option<String>,
    pub expiry_month: Option<i32>,
    pub expiry_year: Option<i32>,
    pub is_default: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Customer details supplied with a payment request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CustomerInput {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1, max = 100))]
    pub first_name: String,

    #[validate(length(min = 1, max = 100))]
    pub last_name: String,

    pub phone: Option<String>,

    pub billing_address: Option<Address>,

    pub external_reference: Option<String>,
}

/// Request to register a stored payment method
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePaymentMethodRequest {
    pub customer_id: Uuid,
    pub method_type: PaymentMethodType,
    #[validate(length(min = 1))]
    pub token: String,
    pub brand: Option<String>,
    pub last_four: Option<String>,
    pub expiry_month: Option<i32>,
    pub expiry_year: Option<i32>,
    #[serde(default)]
    pub is_default: bool,
}
