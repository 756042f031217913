//! Gateway webhook endpoint.
//!
//! Braintree posts form-encoded `bt_signature` / `bt_payload` pairs.
//! Signature verification happens in the billing layer; this handler
//! maps the outcome to HTTP status codes the gateway understands:
//! 2xx acknowledges delivery, 4xx tells it the payload was malformed,
//! 5xx asks for a retry.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use serde_json::json;
use shelfshare_billing::{BillingError, WebhookOutcome};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct BraintreeWebhookForm {
    pub bt_signature: String,
    pub bt_payload: String,
}

pub async fn braintree(
    State(state): State<AppState>,
    Form(form): Form<BraintreeWebhookForm>,
) -> Response {
    match state
        .billing
        .webhooks
        .handle(&form.bt_signature, &form.bt_payload)
        .await
    {
        Ok(WebhookOutcome::Received) => Json(json!({ "received": true })).into_response(),
        Ok(WebhookOutcome::Ignored) => Json(json!({ "ignored": true })).into_response(),
        Err(BillingError::WebhookSignatureInvalid) => {
            tracing::warn!("webhook rejected: signature verification failed");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid signature" })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "webhook processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "webhook processing failed" })),
            )
                .into_response()
        }
    }
}
