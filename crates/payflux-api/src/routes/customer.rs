//! Customer payment-method routes
//!
//! Card details are tokenized at the processor before anything is stored;
//! the saved payment method only carries the profile reference and display
//! fields.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use payflux_core::models::{CreatePaymentMethodRequest, PaymentMethod, PaymentMethodType};
use payflux_core::payment::{validate_payment_method, PaymentMethodInput};
use payflux_core::processor::CardInput;
use payflux_core::Error;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterPaymentMethodRequest {
    pub card_number: String,
    pub expiry_month: u32,
    pub expiry_year: u32,
    pub cvv: String,
    pub cardholder_name: String,
    #[serde(default)]
    pub is_default: bool,
}

pub async fn register_payment_method(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(request): Json<RegisterPaymentMethodRequest>,
) -> ApiResult<Json<PaymentMethod>> {
    validate_payment_method(&PaymentMethodInput {
        method_type: PaymentMethodType::Card,
        card_number: Some(request.card_number.clone()),
        expiry_month: Some(request.expiry_month),
        expiry_year: Some(request.expiry_year),
        cvv: Some(request.cvv.clone()),
        cardholder_name: Some(request.cardholder_name.clone()),
        token: None,
    })?;

    let customer = state
        .customers
        .find_by_id(customer_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("customer {}", customer_id)))?;

    let profile_id = customer
        .processor_profile_id
        .clone()
        .ok_or_else(|| Error::validation("customer has no processor profile yet"))?;

    let card = CardInput {
        number: request.card_number.clone(),
        expiry_month: request.expiry_month,
        expiry_year: request.expiry_year,
        cvv: request.cvv.clone(),
        cardholder_name: request.cardholder_name.clone(),
    };
    let payment_profile_id = state.processor.create_payment_profile(&profile_id, &card).await?;

    let digits: String = request.card_number.chars().filter(|c| c.is_ascii_digit()).collect();
    let last_four = digits[digits.len().saturating_sub(4)..].to_string();

    let method = state
        .customers
        .create_payment_method(&CreatePaymentMethodRequest {
            customer_id,
            method_type: PaymentMethodType::Token,
            token: format!("{}:{}", profile_id, payment_profile_id),
            brand: None,
            last_four: Some(last_four),
            expiry_month: Some(request.expiry_month as i32),
            expiry_year: Some(request.expiry_year as i32),
            is_default: request.is_default,
        })
        .await?;

    Ok(Json(method))
}

pub async fn list_payment_methods(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> ApiResult<Json<Vec<PaymentMethod>>> {
    Ok(Json(state.customers.list_payment_methods(customer_id).await?))
}
