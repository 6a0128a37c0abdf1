//! Payment API routes

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use payflux_core::models::TransactionView;
use payflux_core::payment::{FollowUpRequest, PaymentRequest, PaymentResponse};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn purchase(
    State(state): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> ApiResult<Json<PaymentResponse>> {
    Ok(Json(state.orchestrator.purchase(request).await?))
}

pub async fn authorize(
    State(state): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> ApiResult<Json<PaymentResponse>> {
    Ok(Json(state.orchestrator.authorize(request).await?))
}

pub async fn capture(
    State(state): State<AppState>,
    Json(request): Json<FollowUpRequest>,
) -> ApiResult<Json<PaymentResponse>> {
    Ok(Json(state.orchestrator.capture(request).await?))
}

pub async fn void(
    State(state): State<AppState>,
    Json(request): Json<FollowUpRequest>,
) -> ApiResult<Json<PaymentResponse>> {
    Ok(Json(state.orchestrator.void(request).await?))
}

pub async fn refund(
    State(state): State<AppState>,
    Json(request): Json<FollowUpRequest>,
) -> ApiResult<Json<PaymentResponse>> {
    Ok(Json(state.orchestrator.refund(request).await?))
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TransactionView>> {
    Ok(Json(state.orchestrator.status(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// Window length in days, ending now
    #[serde(default = "default_stats_days")]
    pub days: i64,
}

fn default_stats_days() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct PaymentStats {
    pub from: chrono::DateTime<Utc>,
    pub to: chrono::DateTime<Utc>,
    pub failed: i64,
    pub total: i64,
    /// failed_in_period / total_in_period
    pub failure_rate: f64,
}

pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<PaymentStats>> {
    let to = Utc::now();
    let from = to - Duration::days(query.days.clamp(1, 90));
    let (failed, total) = state.transactions.failure_stats(from, to).await?;

    Ok(Json(PaymentStats {
        from,
        to,
        failed,
        total,
        failure_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
    }))
}
