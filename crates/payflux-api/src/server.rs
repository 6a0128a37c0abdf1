//! HTTP server assembly

use axum::middleware;
use axum::Router;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

use payflux_core::{Error, Result};

use crate::middleware::rate_limit_middleware;
use crate::routes;
use crate::state::AppState;

/// Build the application router with middleware attached
pub fn build_router(state: AppState) -> Router {
    routes::router()
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until the process is stopped
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::network(format!("failed to bind {}: {}", addr, e)))?;

    info!(%addr, "api server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| Error::network(format!("server error: {}", e)))
}
