//! Subscription API routes

use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;
use validator::Validate;

use payflux_core::models::{
    CancelSubscriptionRequest, CreateSubscriptionRequest, Pagination, Subscription,
    UpdateSubscriptionRequest,
};
use payflux_core::Error;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> ApiResult<Json<Subscription>> {
    request
        .validate()
        .map_err(|e| Error::validation(e.to_string()))?;
    Ok(Json(state.engine.create(request).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.engine.get(id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.engine.update(id, request).await?))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelSubscriptionRequest>,
) -> ApiResult<Json<Subscription>> {
    request
        .validate()
        .map_err(|e| Error::validation(e.to_string()))?;
    Ok(Json(state.engine.cancel(id, request).await?))
}

pub async fn pause(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.engine.pause(id).await?))
}

pub async fn resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.engine.resume(id).await?))
}

pub async fn list_by_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Vec<Subscription>>> {
    page.validate().map_err(|e| Error::validation(e.to_string()))?;
    Ok(Json(state.engine.list_by_customer(customer_id, &page).await?))
}
