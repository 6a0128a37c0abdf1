//! Order routes: creation and transaction-derived payment totals

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use payflux_core::models::{Currency, Order, OrderPaymentSummary};
use payflux_core::Error;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    pub subtotal: Decimal,
    #[serde(default)]
    pub tax: Decimal,
    #[serde(default)]
    pub shipping: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub currency: Currency,
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub total: Decimal,
    pub payments: OrderPaymentSummary,
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<Json<Order>> {
    if request.subtotal < Decimal::ZERO {
        return Err(Error::validation("subtotal cannot be negative").into());
    }

    let order = state
        .orders
        .create(
            request.customer_id,
            request.subtotal,
            request.tax,
            request.shipping,
            request.discount,
            request.currency,
        )
        .await?;

    Ok(Json(order))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<OrderView>> {
    let order = state
        .orders
        .find_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("order {}", id)))?;
    let payments = state.orders.payment_summary(id).await?;
    let total = order.total();

    Ok(Json(OrderView { order, total, payments }))
}
