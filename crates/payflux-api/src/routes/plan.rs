//! Plan API routes

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use payflux_core::models::{CreatePlanRequest, SubscriptionPlan};
use payflux_core::Error;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListPlansQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreatePlanRequest>,
) -> ApiResult<Json<SubscriptionPlan>> {
    request
        .validate()
        .map_err(|e| Error::validation(e.to_string()))?;
    request.validate_amounts()?;
    Ok(Json(state.plans.create(&request).await?))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListPlansQuery>,
) -> ApiResult<Json<Vec<SubscriptionPlan>>> {
    Ok(Json(state.plans.list(!query.include_inactive).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<SubscriptionPlan>> {
    let plan = state
        .plans
        .find_by_code(&code)
        .await?
        .ok_or_else(|| Error::not_found(format!("plan {}", code)))?;
    Ok(Json(plan))
}

/// Deactivation only stops new signups; existing subscriptions keep billing
pub async fn deactivate(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.plans.deactivate(&code).await?;
    let active_subscriptions = state.plans.subscription_count(&code).await?;
    Ok(Json(serde_json::json!({
        "code": code,
        "active": false,
        "active_subscriptions": active_subscriptions,
    })))
}
