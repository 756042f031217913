//! Billing synchronizer
//!
//! Single write path from a gateway subscription to the stored billing
//! snapshot. Every operation that touches the gateway ends by handing the
//! resulting subscription here, so the snapshot is always a recomputation
//! from gateway state, never an incremental local edit. Running it twice
//! with the same subscription writes the same values.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use shelfshare_shared::{PaymentStatus, PlanTier};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{GatewaySubscription, GatewaySubscriptionStatus};
use crate::plans;
use crate::store::{CompanyStore, PlanCatalog};
use crate::types::{AddonQuantities, BillingPatch};

/// What a sync wrote, returned to callers and serialized into callable
/// responses.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub plan: Option<PlanTier>,
    pub payment_status: PaymentStatus,
    pub total_monthly_cost_cents: i64,
    #[serde(with = "time::serde::timestamp::option")]
    pub renewal_date: Option<OffsetDateTime>,
}

/// Base price plus each add-on's amount times its quantity.
pub fn total_monthly_cost_cents(subscription: &GatewaySubscription) -> i64 {
    subscription.price_cents
        + subscription
            .add_ons
            .iter()
            .map(|a| a.amount_cents * i64::from(a.quantity))
            .sum::<i64>()
}

/// Project gateway add-ons onto the fixed quantity map. Ids this system
/// does not manage are skipped; managed add-ons absent from the
/// subscription come out as 0.
pub fn addon_quantities(subscription: &GatewaySubscription) -> AddonQuantities {
    let mut quantities = AddonQuantities::default();
    for addon in &subscription.add_ons {
        if let Some(kind) = plans::addon_type_for_gateway_id(&addon.id) {
            quantities.set(kind, quantities.quantity_of(kind) + addon.quantity);
        }
    }
    quantities
}

/// Map a gateway status onto the stored payment status. Unknown states are
/// treated as past-due so they surface to the customer instead of silently
/// passing as healthy.
pub fn map_status(status: &GatewaySubscriptionStatus) -> PaymentStatus {
    match status {
        GatewaySubscriptionStatus::Active => PaymentStatus::Active,
        GatewaySubscriptionStatus::PastDue => PaymentStatus::PastDue,
        GatewaySubscriptionStatus::Canceled => PaymentStatus::Canceled,
        GatewaySubscriptionStatus::Other(raw) => {
            tracing::warn!(gateway_status = %raw, "Unknown gateway subscription status");
            PaymentStatus::PastDue
        }
    }
}

pub struct BillingSynchronizer {
    store: Arc<dyn CompanyStore>,
    catalog: Arc<dyn PlanCatalog>,
}

impl BillingSynchronizer {
    pub fn new(store: Arc<dyn CompanyStore>, catalog: Arc<dyn PlanCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Recompute the company's billing snapshot from a gateway subscription
    /// and merge it into the store.
    pub async fn sync_from_subscription(
        &self,
        company_id: Uuid,
        subscription: &GatewaySubscription,
    ) -> BillingResult<SyncOutcome> {
        if subscription.id.is_empty() {
            return Err(BillingError::InvalidArgument(
                "subscription has no id".to_string(),
            ));
        }
        if subscription.plan_id.is_empty() {
            return Err(BillingError::InvalidArgument(
                "subscription has no plan id".to_string(),
            ));
        }

        let plan = plans::tier_for_gateway_plan_id(&subscription.plan_id);
        if plan.is_none() {
            // Leave the stored plan untouched rather than guessing.
            tracing::warn!(
                company_id = %company_id,
                gateway_plan_id = %subscription.plan_id,
                "Subscription references an unrecognized gateway plan"
            );
        }

        let payment_status = map_status(&subscription.status);
        let total = total_monthly_cost_cents(subscription);

        let patch = BillingPatch {
            plan,
            subscription_id: Some(subscription.id.clone()),
            payment_status: Some(payment_status),
            renewal_date: subscription.next_billing_date,
            billing_period_end: subscription.paid_through_date,
            total_monthly_cost_cents: Some(total),
            addons: Some(addon_quantities(subscription)),
            ..Default::default()
        };

        self.store.merge_billing(company_id, patch).await?;

        if plan.is_some() {
            self.propagate_limits(company_id, &subscription.plan_id).await;
        }

        tracing::info!(
            company_id = %company_id,
            subscription_id = %subscription.id,
            plan = ?plan,
            payment_status = %payment_status,
            total_cents = total,
            "Billing snapshot synced"
        );

        Ok(SyncOutcome {
            plan,
            payment_status,
            total_monthly_cost_cents: total,
            renewal_date: subscription.next_billing_date,
        })
    }

    /// Best effort. A catalog hiccup must not fail the sync that already
    /// committed the snapshot.
    async fn propagate_limits(&self, company_id: Uuid, gateway_plan_id: &str) {
        match self.catalog.find_by_gateway_plan_id(gateway_plan_id).await {
            Ok(Some(entry)) => {
                if let Err(e) = self
                    .store
                    .update_limits(company_id, entry.user_limit, entry.connection_limit)
                    .await
                {
                    tracing::warn!(
                        company_id = %company_id,
                        error = %e,
                        "Failed to propagate plan limits"
                    );
                }
            }
            Ok(None) => {
                tracing::warn!(
                    company_id = %company_id,
                    gateway_plan_id = %gateway_plan_id,
                    "Plan missing from catalog, limits not updated"
                );
            }
            Err(e) => {
                tracing::warn!(
                    company_id = %company_id,
                    error = %e,
                    "Plan catalog lookup failed, limits not updated"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayAddon;

    fn subscription_with_addons() -> GatewaySubscription {
        GatewaySubscription {
            id: "sub_total".to_string(),
            plan_id: "shelfshare-team".to_string(),
            status: GatewaySubscriptionStatus::Active,
            price_cents: 2900,
            add_ons: vec![
                GatewayAddon {
                    id: "team-extrauser".to_string(),
                    amount_cents: 500,
                    quantity: 3,
                },
                GatewayAddon {
                    id: "team-extraconnection".to_string(),
                    amount_cents: 250,
                    quantity: 2,
                },
            ],
            next_billing_date: None,
            paid_through_date: None,
        }
    }

    #[test]
    fn total_is_base_plus_addon_lines() {
        // 29.00 + 5.00 x 3 + 2.50 x 2 = 49.00
        assert_eq!(total_monthly_cost_cents(&subscription_with_addons()), 4900);
    }

    #[test]
    fn unmanaged_addons_are_skipped_but_still_billed() {
        let mut sub = subscription_with_addons();
        sub.add_ons.push(GatewayAddon {
            id: "partner-analytics".to_string(),
            amount_cents: 1000,
            quantity: 1,
        });

        let quantities = addon_quantities(&sub);
        assert_eq!(quantities.extra_user, 3);
        assert_eq!(quantities.extra_connection, 2);
        // Cost still includes the unmanaged line
        assert_eq!(total_monthly_cost_cents(&sub), 5900);
    }

    #[test]
    fn removed_addon_reads_as_zero() {
        let mut sub = subscription_with_addons();
        sub.add_ons.retain(|a| a.id != "team-extrauser");
        let quantities = addon_quantities(&sub);
        assert_eq!(quantities.extra_user, 0);
        assert_eq!(quantities.extra_connection, 2);
    }

    #[test]
    fn unknown_status_maps_to_past_due() {
        assert_eq!(
            map_status(&GatewaySubscriptionStatus::Other("Pending".to_string())),
            PaymentStatus::PastDue
        );
        assert_eq!(
            map_status(&GatewaySubscriptionStatus::Active),
            PaymentStatus::Active
        );
        assert_eq!(
            map_status(&GatewaySubscriptionStatus::Canceled),
            PaymentStatus::Canceled
        );
    }
}
