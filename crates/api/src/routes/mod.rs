//! HTTP route definitions.

pub mod billing;
pub mod webhooks;

use axum::{routing::get, routing::post, Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/billing/client-token", post(billing::client_token))
        .route("/api/billing/subscription", post(billing::create_subscription))
        .route(
            "/api/billing/subscription/cancel",
            post(billing::cancel_subscription),
        )
        .route("/api/billing/plan", post(billing::change_plan))
        .route("/api/billing/addons/add", post(billing::add_addon))
        .route("/api/billing/addons/remove", post(billing::remove_addon))
        .route("/api/billing/downgrade", post(billing::schedule_downgrade))
        .route(
            "/api/billing/downgrade/cancel",
            post(billing::cancel_scheduled_downgrade),
        )
        .route("/api/billing/invariants", get(billing::run_invariant_checks))
        .route("/webhooks/braintree", post(webhooks::braintree))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
