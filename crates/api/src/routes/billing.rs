//! Billing operation endpoints.
//!
//! Thin JSON shims over [`shelfshare_billing::SubscriptionService`]. All
//! authorization happens in the billing layer; handlers only shuttle the
//! optional caller id through.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use shelfshare_billing::{
    AddonChangeResult, AddonType, BillingError, CancelSubscriptionResult, ClientTokenResponse,
    CreateSubscriptionResult, InvariantCheckSummary, PlanChangeResult, RemoveAddonResult,
    ScheduledDowngrade,
};
use uuid::Uuid;

use crate::{auth::MaybeCaller, error::ApiResult, state::AppState};

#[derive(Deserialize)]
pub struct CompanyRequest {
    pub company_id: Uuid,
}

#[derive(Deserialize)]
pub struct CreateSubscriptionRequest {
    pub company_id: Uuid,
    pub payment_method_nonce: String,
    pub plan_id: String,
}

#[derive(Deserialize)]
pub struct ChangePlanRequest {
    pub company_id: Uuid,
    pub plan_id: String,
}

#[derive(Deserialize)]
pub struct AddonRequest {
    pub company_id: Uuid,
    pub addon_type: AddonType,
    pub quantity: i32,
}

pub async fn client_token(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Json(req): Json<CompanyRequest>,
) -> ApiResult<Json<ClientTokenResponse>> {
    let response = state
        .billing
        .subscriptions
        .client_token(caller, req.company_id)
        .await?;
    Ok(Json(response))
}

pub async fn create_subscription(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Json(req): Json<CreateSubscriptionRequest>,
) -> ApiResult<Json<CreateSubscriptionResult>> {
    let result = state
        .billing
        .subscriptions
        .create_subscription(caller, req.company_id, &req.payment_method_nonce, &req.plan_id)
        .await?;
    Ok(Json(result))
}

pub async fn change_plan(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<PlanChangeResult>> {
    let result = state
        .billing
        .subscriptions
        .change_plan(caller, req.company_id, &req.plan_id)
        .await?;
    Ok(Json(result))
}

pub async fn add_addon(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Json(req): Json<AddonRequest>,
) -> ApiResult<Json<AddonChangeResult>> {
    let result = state
        .billing
        .subscriptions
        .add_addon(caller, req.company_id, req.addon_type, req.quantity)
        .await?;
    Ok(Json(result))
}

pub async fn remove_addon(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Json(req): Json<AddonRequest>,
) -> ApiResult<Json<RemoveAddonResult>> {
    let result = state
        .billing
        .subscriptions
        .remove_addon(caller, req.company_id, req.addon_type, req.quantity)
        .await?;
    Ok(Json(result))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Json(req): Json<CompanyRequest>,
) -> ApiResult<Json<CancelSubscriptionResult>> {
    let result = state
        .billing
        .subscriptions
        .cancel_subscription(caller, req.company_id)
        .await?;
    Ok(Json(result))
}

pub async fn schedule_downgrade(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<ScheduledDowngrade>> {
    let result = state
        .billing
        .subscriptions
        .schedule_downgrade(caller, req.company_id, &req.plan_id)
        .await?;
    Ok(Json(result))
}

pub async fn cancel_scheduled_downgrade(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Json(req): Json<CompanyRequest>,
) -> ApiResult<Json<Value>> {
    state
        .billing
        .subscriptions
        .cancel_scheduled_downgrade(caller, req.company_id)
        .await?;
    Ok(Json(json!({ "canceled": true })))
}

#[derive(Deserialize)]
pub struct InvariantQuery {
    /// Run a single named check instead of the whole suite.
    pub check: Option<String>,
}

/// Run the billing invariant suite. Operator surface, restricted to
/// platform staff.
pub async fn run_invariant_checks(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Query(query): Query<InvariantQuery>,
) -> ApiResult<Json<InvariantCheckSummary>> {
    let caller = caller.ok_or(BillingError::Unauthenticated)?;

    let role: Option<String> = sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
        .bind(caller)
        .fetch_optional(&state.pool)
        .await
        .map_err(BillingError::from)?;

    if role.as_deref() != Some("super-admin") {
        return Err(BillingError::PermissionDenied(
            "invariant checks are restricted to platform staff".to_string(),
        )
        .into());
    }

    let summary = match query.check.as_deref() {
        Some(name) => state.billing.invariants.run_check(name).await?,
        None => state.billing.invariants.run_all_checks().await?,
    };
    Ok(Json(summary))
}
