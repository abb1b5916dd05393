//! HTTP route definitions

pub mod admin;
pub mod billing;
pub mod subscriptions;
pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/billing/history", post(billing::billing_history))
        .route("/api/v1/subscription", post(subscriptions::activate))
        .route(
            "/api/v1/subscription/{user_id}",
            get(subscriptions::get_subscription).patch(subscriptions::update_subscription),
        )
        .route(
            "/api/v1/subscription/{user_id}/trial",
            post(subscriptions::start_trial),
        )
        .route(
            "/api/v1/subscription/{user_id}/trial/extend",
            post(subscriptions::extend_trial),
        )
        .route(
            "/api/v1/subscription/{user_id}/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/api/v1/subscription/{user_id}/upgrade-price",
            post(subscriptions::upgrade_price),
        )
        .route(
            "/api/v1/subscription/{user_id}/upgrade-order",
            post(subscriptions::upgrade_order),
        )
        .route(
            "/api/v1/subscription/{user_id}/access",
            get(subscriptions::check_access),
        )
        .route(
            "/api/v1/admin/subscription-analytics",
            get(admin::subscription_analytics),
        )
        .route("/api/v1/admin/invariants", get(admin::invariants))
        .route("/api/v1/webhooks/razorpay", post(webhooks::razorpay))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Wrap a payload in the uniform success envelope.
pub(crate) fn success<T: serde::Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": data,
    }))
}
