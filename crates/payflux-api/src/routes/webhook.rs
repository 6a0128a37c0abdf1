//! Processor webhook ingestion route
//!
//! The body is taken as raw bytes so signature verification sees exactly
//! what arrived on the wire.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use payflux_core::webhooks::InboundOutcome;

use crate::error::ApiResult;
use crate::state::AppState;

const SIGNATURE_HEADERS: [&str; 2] = ["x-anet-signature", "x-signature"];

pub async fn receive_processor_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok());

    match state.inbound.receive(&body, signature).await? {
        InboundOutcome::Processed { webhook_id, detail } => Ok(Json(json!({
            "status": "processed",
            "webhook_id": webhook_id,
            "detail": detail,
        }))),
        InboundOutcome::Duplicate => Ok(Json(json!({ "status": "duplicate" }))),
    }
}
