//! Subscription lifecycle operations
//!
//! The callable surface: client tokens, subscription creation, plan changes,
//! add-ons, cancellation, and scheduled downgrades. Every mutation ends by
//! running the synchronizer against the gateway's subscription object, so the
//! stored snapshot never drifts from gateway state by way of local edits.
//!
//! Plan changes are modeled as cancel-old/create-new rather than an in-place
//! gateway plan mutation. This restarts the billing cycle on the new plan and
//! avoids the gateway's proration machinery entirely.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use shelfshare_shared::PlanTier;

use crate::authz::BillingAuthorizer;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{AddonUpdates, SubscriptionGateway};
use crate::plans;
use crate::store::{CompanyStore, PlanCatalog};
use crate::sync::{self, BillingSynchronizer, SyncOutcome};
use crate::types::{
    AddonType, BillingPatch, Company, PendingAddonRemoval, PendingPlanChange,
};

#[derive(Debug, Clone, Serialize)]
pub struct ClientTokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSubscriptionResult {
    pub subscription_id: String,
    pub customer_id: String,
    pub sync: SyncOutcome,
}

/// Outcome of a plan change. `warnings` carries best-effort cleanup failures
/// (carried-over add-on stripping, old-subscription cancellation) that did
/// not fail the operation because the authoritative sync already succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct PlanChangeResult {
    pub changed: bool,
    pub plan: PlanTier,
    pub sync: Option<SyncOutcome>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddonChangeResult {
    pub addon_type: AddonType,
    pub quantity: i32,
    pub sync: SyncOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveAddonResult {
    pub addon_type: AddonType,
    pub next_quantity: i32,
    #[serde(with = "time::serde::timestamp")]
    pub effective_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelSubscriptionResult {
    #[serde(with = "time::serde::timestamp")]
    pub canceled_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledDowngrade {
    pub next_plan: PlanTier,
    #[serde(with = "time::serde::timestamp")]
    pub effective_at: OffsetDateTime,
}

pub struct SubscriptionService {
    gateway: Arc<dyn SubscriptionGateway>,
    store: Arc<dyn CompanyStore>,
    sync: BillingSynchronizer,
    authz: BillingAuthorizer,
}

impl SubscriptionService {
    pub fn new(
        gateway: Arc<dyn SubscriptionGateway>,
        store: Arc<dyn CompanyStore>,
        catalog: Arc<dyn PlanCatalog>,
    ) -> Self {
        Self {
            gateway,
            sync: BillingSynchronizer::new(Arc::clone(&store), catalog),
            authz: BillingAuthorizer::new(Arc::clone(&store)),
            store,
        }
    }

    async fn require_company(&self, company_id: Uuid) -> BillingResult<Company> {
        self.store
            .get_company(company_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("company {company_id}")))
    }

    /// Client token for the payment drop-in, scoped to the company's gateway
    /// customer when one exists. Admin-checked even though read-only: a
    /// customer-scoped token exposes vaulted payment methods.
    pub async fn client_token(
        &self,
        caller: Option<Uuid>,
        company_id: Uuid,
    ) -> BillingResult<ClientTokenResponse> {
        self.authz.require_billing_admin(caller, company_id).await?;
        let company = self.require_company(company_id).await?;

        let token = self
            .gateway
            .generate_client_token(company.billing.gateway_customer_id.as_deref())
            .await?;

        Ok(ClientTokenResponse { token })
    }

    pub async fn create_subscription(
        &self,
        caller: Option<Uuid>,
        company_id: Uuid,
        payment_method_nonce: &str,
        plan_id: &str,
    ) -> BillingResult<CreateSubscriptionResult> {
        self.authz.require_billing_admin(caller, company_id).await?;

        if payment_method_nonce.trim().is_empty() {
            return Err(BillingError::InvalidArgument(
                "payment method nonce is required".to_string(),
            ));
        }
        let plan = PlanTier::from_str(plan_id).ok_or_else(|| {
            BillingError::InvalidArgument(format!("unknown plan '{plan_id}'"))
        })?;
        if !plans::is_purchasable(plan) {
            return Err(BillingError::FailedPrecondition(
                "the free plan does not require a subscription".to_string(),
            ));
        }

        let company = self.require_company(company_id).await?;
        if company.billing.subscription_id.is_some() {
            return Err(BillingError::FailedPrecondition(
                "company already has a subscription".to_string(),
            ));
        }

        // Lazily create the gateway customer, persisting the id before any
        // further gateway call so a crash cannot orphan the linkage.
        let customer_id = match company.billing.gateway_customer_id {
            Some(id) => id,
            None => {
                let customer = self
                    .gateway
                    .create_customer(company_id, &company.name)
                    .await?;
                self.store
                    .merge_billing(
                        company_id,
                        BillingPatch {
                            gateway_customer_id: Some(customer.id.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                customer.id
            }
        };

        let payment_method = self
            .gateway
            .vault_payment_method(&customer_id, payment_method_nonce)
            .await?;

        let subscription = self
            .gateway
            .create_subscription(&payment_method.token, plans::gateway_plan_id(plan))
            .await?;

        let sync = self
            .sync
            .sync_from_subscription(company_id, &subscription)
            .await?;

        tracing::info!(
            company_id = %company_id,
            subscription_id = %subscription.id,
            plan = %plan,
            "Subscription created"
        );

        Ok(CreateSubscriptionResult {
            subscription_id: subscription.id,
            customer_id,
            sync,
        })
    }

    /// Change plan by creating a fresh subscription on the new plan and
    /// retiring the old one. Guarded by the per-company plan-change lock,
    /// acquired with a conditional update so two concurrent calls cannot
    /// both pass the check. The lock is released on every exit path.
    pub async fn change_plan(
        &self,
        caller: Option<Uuid>,
        company_id: Uuid,
        new_plan_id: &str,
    ) -> BillingResult<PlanChangeResult> {
        self.authz.require_billing_admin(caller, company_id).await?;

        // NotFound before lock acquisition: the conditional update below
        // reports "locked" for a missing row, which would mislead.
        self.require_company(company_id).await?;

        if !self.store.try_begin_plan_change(company_id).await? {
            return Err(BillingError::FailedPrecondition(
                "a plan change is already in progress".to_string(),
            ));
        }

        let result = self.change_plan_locked(company_id, new_plan_id).await;

        if let Err(e) = self.store.end_plan_change(company_id).await {
            // The stuck-lock invariant check picks this up if it persists.
            tracing::error!(
                company_id = %company_id,
                error = %e,
                "Failed to release plan-change lock"
            );
        }

        result
    }

    async fn change_plan_locked(
        &self,
        company_id: Uuid,
        new_plan_id: &str,
    ) -> BillingResult<PlanChangeResult> {
        let company = self.require_company(company_id).await?;

        if company.billing.pending_change.is_some() {
            return Err(BillingError::FailedPrecondition(
                "a downgrade is already scheduled; cancel it first".to_string(),
            ));
        }

        let new_plan = PlanTier::from_str(new_plan_id).ok_or_else(|| {
            BillingError::InvalidArgument(format!("unknown plan '{new_plan_id}'"))
        })?;
        if !plans::is_purchasable(new_plan) {
            return Err(BillingError::FailedPrecondition(
                "cannot change to the free plan; cancel the subscription instead".to_string(),
            ));
        }

        let subscription_id = company.billing.subscription_id.clone().ok_or_else(|| {
            BillingError::FailedPrecondition("company has no subscription".to_string())
        })?;
        let customer_id = company.billing.gateway_customer_id.clone().ok_or_else(|| {
            BillingError::FailedPrecondition("company has no gateway customer".to_string())
        })?;

        if company.billing.plan == new_plan {
            return Ok(PlanChangeResult {
                changed: false,
                plan: new_plan,
                sync: None,
                warnings: Vec::new(),
            });
        }

        let old_subscription = self.gateway.find_subscription(&subscription_id).await?;

        let payment_method = self
            .gateway
            .first_payment_method(&customer_id)
            .await?
            .ok_or_else(|| {
                BillingError::FailedPrecondition(
                    "no vaulted payment method on file".to_string(),
                )
            })?;

        let new_subscription = self
            .gateway
            .create_subscription(&payment_method.token, plans::gateway_plan_id(new_plan))
            .await?;

        // Authoritative write. Everything after this is best-effort hygiene.
        let sync = self
            .sync
            .sync_from_subscription(company_id, &new_subscription)
            .await?;

        // A removal scheduled under the old plan targets an add-on line the
        // new subscription does not carry; applying it at renewal would cut
        // capacity bought after the change. The marker dies with the plan.
        if company.billing.pending_addon_removal.is_some() {
            self.store.clear_pending_addon_removal(company_id).await?;
        }

        let mut warnings = Vec::new();

        let carried: Vec<String> = new_subscription
            .add_ons
            .iter()
            .map(|a| a.id.clone())
            .collect();
        if !carried.is_empty() {
            match self
                .gateway
                .update_addons(
                    &new_subscription.id,
                    AddonUpdates {
                        remove: carried,
                        ..Default::default()
                    },
                    false,
                )
                .await
            {
                Ok(stripped) => {
                    if let Err(e) = self.sync.sync_from_subscription(company_id, &stripped).await
                    {
                        tracing::warn!(
                            company_id = %company_id,
                            error = %e,
                            "Re-sync after add-on strip failed"
                        );
                        warnings.push(format!("re-sync after add-on strip failed: {e}"));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        company_id = %company_id,
                        subscription_id = %new_subscription.id,
                        error = %e,
                        "Failed to strip carried-over add-ons from new subscription"
                    );
                    warnings.push(format!("failed to strip carried-over add-ons: {e}"));
                }
            }
        }

        if let Err(e) = self.gateway.cancel_subscription(&old_subscription.id).await {
            tracing::warn!(
                company_id = %company_id,
                subscription_id = %old_subscription.id,
                error = %e,
                "Failed to cancel superseded subscription"
            );
            warnings.push(format!("failed to cancel superseded subscription: {e}"));
        }

        tracing::info!(
            company_id = %company_id,
            old_subscription = %old_subscription.id,
            new_subscription = %new_subscription.id,
            plan = %new_plan,
            warning_count = warnings.len(),
            "Plan changed with billing cycle restart"
        );

        Ok(PlanChangeResult {
            changed: true,
            plan: new_plan,
            sync: Some(sync),
            warnings,
        })
    }

    /// Add add-on capacity, effective immediately and non-prorating. Reads
    /// the live subscription rather than the snapshot so an existing line is
    /// incremented instead of duplicated.
    pub async fn add_addon(
        &self,
        caller: Option<Uuid>,
        company_id: Uuid,
        addon: AddonType,
        quantity: i32,
    ) -> BillingResult<AddonChangeResult> {
        self.authz.require_billing_admin(caller, company_id).await?;

        if quantity < 1 {
            return Err(BillingError::InvalidArgument(
                "quantity must be at least 1".to_string(),
            ));
        }

        let company = self.require_company(company_id).await?;
        let subscription_id = company.billing.subscription_id.clone().ok_or_else(|| {
            BillingError::FailedPrecondition("company has no subscription".to_string())
        })?;

        let gateway_addon_id = plans::gateway_addon_id(company.billing.plan.as_str(), addon)?;

        let live = self.gateway.find_subscription(&subscription_id).await?;

        let updates = match live.add_ons.iter().find(|a| a.id == gateway_addon_id) {
            Some(existing) => AddonUpdates {
                update: vec![(gateway_addon_id.to_string(), existing.quantity + quantity)],
                ..Default::default()
            },
            None => AddonUpdates {
                add: vec![(gateway_addon_id.to_string(), quantity)],
                ..Default::default()
            },
        };

        let updated = self
            .gateway
            .update_addons(&subscription_id, updates, false)
            .await?;

        let new_quantity = sync::addon_quantities(&updated).quantity_of(addon);
        let sync = self.sync.sync_from_subscription(company_id, &updated).await?;

        tracing::info!(
            company_id = %company_id,
            addon = %addon,
            quantity = new_quantity,
            "Add-on quantity increased"
        );

        Ok(AddonChangeResult {
            addon_type: addon,
            quantity: new_quantity,
            sync,
        })
    }

    /// Schedule an add-on removal for the renewal boundary. Never calls the
    /// gateway: the customer keeps the capacity they paid for until the
    /// current period ends, when the renewal webhook applies the removal.
    pub async fn remove_addon(
        &self,
        caller: Option<Uuid>,
        company_id: Uuid,
        addon: AddonType,
        remove_quantity: i32,
    ) -> BillingResult<RemoveAddonResult> {
        self.authz.require_billing_admin(caller, company_id).await?;

        if remove_quantity < 1 {
            return Err(BillingError::InvalidArgument(
                "removal quantity must be at least 1".to_string(),
            ));
        }

        let company = self.require_company(company_id).await?;
        if company.billing.subscription_id.is_none() {
            return Err(BillingError::FailedPrecondition(
                "company has no subscription".to_string(),
            ));
        }
        let effective_at = company.billing.renewal_date.ok_or_else(|| {
            BillingError::FailedPrecondition("company has no renewal date".to_string())
        })?;

        // One pending removal slot. Re-removing the same type overwrites the
        // schedule; a different type would silently clobber it, so reject.
        if let Some(pending) = company.billing.pending_addon_removal {
            if pending.addon_type != addon {
                return Err(BillingError::FailedPrecondition(format!(
                    "a removal of '{}' is already pending until renewal",
                    pending.addon_type
                )));
            }
        }

        let current = company.billing.addons.quantity_of(addon);
        let next_quantity = (current - remove_quantity).max(0);

        self.store
            .set_pending_addon_removal(
                company_id,
                PendingAddonRemoval {
                    addon_type: addon,
                    next_quantity,
                    effective_at,
                },
            )
            .await?;

        tracing::info!(
            company_id = %company_id,
            addon = %addon,
            current,
            next_quantity,
            "Add-on removal scheduled for renewal"
        );

        Ok(RemoveAddonResult {
            addon_type: addon,
            next_quantity,
            effective_at,
        })
    }

    /// Cancel at the gateway and mark the snapshot canceled. The
    /// subscription id is retained for audit history.
    pub async fn cancel_subscription(
        &self,
        caller: Option<Uuid>,
        company_id: Uuid,
    ) -> BillingResult<CancelSubscriptionResult> {
        self.authz.require_billing_admin(caller, company_id).await?;

        let company = self.require_company(company_id).await?;
        let subscription_id = company.billing.subscription_id.clone().ok_or_else(|| {
            BillingError::FailedPrecondition("company has no subscription".to_string())
        })?;
        if company.billing.renewal_date.is_none() {
            return Err(BillingError::FailedPrecondition(
                "company has no renewal date".to_string(),
            ));
        }

        self.gateway.cancel_subscription(&subscription_id).await?;

        let canceled_at = OffsetDateTime::now_utc();
        self.store
            .merge_billing(
                company_id,
                BillingPatch {
                    payment_status: Some(shelfshare_shared::PaymentStatus::Canceled),
                    canceled_at: Some(canceled_at),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(
            company_id = %company_id,
            subscription_id = %subscription_id,
            "Subscription canceled"
        );

        Ok(CancelSubscriptionResult { canceled_at })
    }

    /// Schedule a downgrade for the renewal boundary. Writes only the
    /// pending marker; the actual plan change happens through a later
    /// explicit plan change or a renewal-time process.
    pub async fn schedule_downgrade(
        &self,
        caller: Option<Uuid>,
        company_id: Uuid,
        next_plan_id: &str,
    ) -> BillingResult<ScheduledDowngrade> {
        self.authz.require_billing_admin(caller, company_id).await?;

        let company = self.require_company(company_id).await?;
        if company.billing.subscription_id.is_none() {
            return Err(BillingError::FailedPrecondition(
                "company has no active subscription".to_string(),
            ));
        }
        let effective_at = company.billing.renewal_date.ok_or_else(|| {
            BillingError::FailedPrecondition("company has no renewal date".to_string())
        })?;
        if company.billing.plan_change_in_progress {
            return Err(BillingError::FailedPrecondition(
                "a plan change is in progress".to_string(),
            ));
        }

        let next_plan = PlanTier::from_str(next_plan_id).ok_or_else(|| {
            BillingError::InvalidArgument(format!("unknown plan '{next_plan_id}'"))
        })?;
        if plans::tier_rank(next_plan) >= plans::tier_rank(company.billing.plan) {
            return Err(BillingError::InvalidArgument(format!(
                "'{next_plan}' is not a downgrade from '{}'",
                company.billing.plan
            )));
        }

        self.store
            .set_pending_change(
                company_id,
                PendingPlanChange {
                    next_plan,
                    effective_at,
                },
            )
            .await?;

        tracing::info!(
            company_id = %company_id,
            next_plan = %next_plan,
            "Downgrade scheduled for renewal"
        );

        Ok(ScheduledDowngrade {
            next_plan,
            effective_at,
        })
    }

    pub async fn cancel_scheduled_downgrade(
        &self,
        caller: Option<Uuid>,
        company_id: Uuid,
    ) -> BillingResult<()> {
        self.authz.require_billing_admin(caller, company_id).await?;
        self.require_company(company_id).await?;
        self.store.clear_pending_change(company_id).await?;

        tracing::info!(company_id = %company_id, "Scheduled downgrade cancelled");
        Ok(())
    }
}
