//! API route modules

pub mod customer;
pub mod order;
pub mod payment;
pub mod plan;
pub mod subscription;
pub mod webhook;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router
pub fn router() -> Router<AppState> {
    Router::new()
        // payments
        .route("/payments/purchase", post(payment::purchase))
        .route("/payments/authorize", post(payment::authorize))
        .route("/payments/capture", post(payment::capture))
        .route("/payments/void", post(payment::void))
        .route("/payments/refund", post(payment::refund))
        .route("/payments/:id", get(payment::status))
        .route("/stats/payments", get(payment::stats))
        // subscriptions
        .route("/subscriptions", post(subscription::create))
        .route("/subscriptions/:id", get(subscription::get).patch(subscription::update))
        .route("/subscriptions/:id/cancel", post(subscription::cancel))
        .route("/subscriptions/:id/pause", post(subscription::pause))
        .route("/subscriptions/:id/resume", post(subscription::resume))
        .route("/customers/:id/subscriptions", get(subscription::list_by_customer))
        // customers
        .route(
            "/customers/:id/payment-methods",
            post(customer::register_payment_method).get(customer::list_payment_methods),
        )
        // orders
        .route("/orders", post(order::create))
        .route("/orders/:id", get(order::get))
        // plans
        .route("/plans", post(plan::create).get(plan::list))
        .route("/plans/:code", get(plan::get).delete(plan::deactivate))
        // processor webhooks
        .route("/webhooks/processor", post(webhook::receive_processor_event))
}
