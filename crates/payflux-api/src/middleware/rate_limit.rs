//! Rate limiting middleware
//!
//! Consults the shared token-bucket limiter per identifier. API-key callers
//! are tracked under `api:`, everyone else under `ip:`.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;

use crate::state::AppState;

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = identifier_for(&request, addr);

    let decision = state.limiter.is_allowed_default(&identifier).await;
    if !decision.allowed {
        let mut response =
            (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
        if let Some(reset_at) = decision.reset_at {
            let seconds = (reset_at - chrono::Utc::now()).num_seconds().max(0);
            if let Ok(value) = seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        return response;
    }

    let mut response = next.run(request).await;
    if let Ok(value) = decision.remaining.to_string().parse() {
        response.headers_mut().insert("X-RateLimit-Remaining", value);
    }
    response
}

fn identifier_for(request: &Request, addr: SocketAddr) -> String {
    if let Some(key) = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
    {
        return format!("api:{}", key);
    }
    format!("ip:{}", addr.ip())
}
