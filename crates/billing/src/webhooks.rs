//! Gateway webhook handling
//!
//! Re-synchronizes billing state on provider-initiated events and applies
//! deferred add-on removals at renewal. The only trust boundary is the
//! signature/payload pair; everything else is unauthenticated. Irrelevant or
//! unresolvable events are acknowledged rather than erroring so the provider
//! does not retry them forever; genuine internal failures propagate so the
//! provider does retry.

use std::sync::Arc;

use serde::Serialize;

use shelfshare_shared::PaymentStatus;

use crate::error::BillingResult;
use crate::gateway::{AddonUpdates, SubscriptionGateway, WebhookNotification};
use crate::plans;
use crate::store::{AuditLog, CompanyStore, PlanCatalog, WebhookJournal};
use crate::sync::BillingSynchronizer;
use crate::types::{BillingAuditRecord, BillingPatch, Company};

/// How a verified webhook was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Event processed and billing state re-synced.
    Received,
    /// Event carried no subscription, or no company owns it. Acknowledged
    /// without action.
    Ignored,
}

pub struct WebhookHandler {
    gateway: Arc<dyn SubscriptionGateway>,
    store: Arc<dyn CompanyStore>,
    sync: BillingSynchronizer,
    audit: Arc<dyn AuditLog>,
    journal: Arc<dyn WebhookJournal>,
}

impl WebhookHandler {
    pub fn new(
        gateway: Arc<dyn SubscriptionGateway>,
        store: Arc<dyn CompanyStore>,
        catalog: Arc<dyn PlanCatalog>,
        audit: Arc<dyn AuditLog>,
        journal: Arc<dyn WebhookJournal>,
    ) -> Self {
        Self {
            gateway,
            sync: BillingSynchronizer::new(Arc::clone(&store), catalog),
            store,
            audit,
            journal,
        }
    }

    /// Verify, decode, and process a webhook delivery. Signature failures
    /// surface as `WebhookSignatureInvalid` before any processing.
    pub async fn handle(&self, signature: &str, payload: &str) -> BillingResult<WebhookOutcome> {
        let notification = self.gateway.parse_webhook(signature, payload)?;

        let subscription_id = notification
            .subscription
            .as_ref()
            .map(|s| s.id.clone());

        let result = self.process(&notification).await;

        let (outcome, error) = match &result {
            Ok(outcome) => (
                match outcome {
                    WebhookOutcome::Received => "received",
                    WebhookOutcome::Ignored => "ignored",
                },
                None,
            ),
            Err(e) => ("failed", Some(e.to_string())),
        };
        if let Err(e) = self
            .journal
            .record(
                &notification.kind,
                subscription_id.as_deref(),
                outcome,
                error.as_deref(),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to journal webhook delivery");
        }

        result
    }

    async fn process(&self, notification: &WebhookNotification) -> BillingResult<WebhookOutcome> {
        let Some(subscription) = notification.subscription.as_ref() else {
            tracing::info!(
                kind = %notification.kind,
                "Webhook carries no subscription, acknowledged without action"
            );
            return Ok(WebhookOutcome::Ignored);
        };
        if subscription.id.is_empty() {
            tracing::info!(kind = %notification.kind, "Webhook subscription has no id");
            return Ok(WebhookOutcome::Ignored);
        }

        let Some(company) = self
            .store
            .find_company_by_subscription(&subscription.id)
            .await?
        else {
            // Deleted or migrated tenant; acknowledge so the provider stops.
            tracing::info!(
                kind = %notification.kind,
                subscription_id = %subscription.id,
                "No company owns this subscription, acknowledged without action"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let sync = self
            .sync
            .sync_from_subscription(company.id, subscription)
            .await?;
        let mut payment_status = sync.payment_status;

        // Explicit lifecycle kinds override the embedded subscription's
        // status, which can be momentarily stale.
        if let Some(forced) = status_override(&notification.kind) {
            if forced != payment_status {
                self.store
                    .merge_billing(
                        company.id,
                        BillingPatch {
                            payment_status: Some(forced),
                            ..Default::default()
                        },
                    )
                    .await?;
                payment_status = forced;
            }
        }

        let mut total = sync.total_monthly_cost_cents;
        if is_renewal_kind(&notification.kind) {
            // Re-read after the sync: the add-on id must resolve against
            // the plan now in effect, not the one stored before this event.
            if let Some(fresh) = self.store.get_company(company.id).await? {
                if let Some(updated_total) = self.apply_pending_removal(&fresh).await? {
                    total = updated_total;
                }
            }
        }

        self.audit
            .append(&BillingAuditRecord {
                company_id: company.id,
                subscription_id: subscription.id.clone(),
                event_kind: notification.kind.clone(),
                payment_status,
                total_monthly_cost_cents: total,
            })
            .await?;

        tracing::info!(
            company_id = %company.id,
            kind = %notification.kind,
            payment_status = %payment_status,
            "Webhook processed"
        );

        Ok(WebhookOutcome::Received)
    }

    /// Execute a deferred add-on removal at renewal. The pending marker is
    /// cleared only when the gateway reports success; on failure it stays in
    /// place so the next renewal event retries. Returns the re-synced total
    /// when the removal was applied.
    async fn apply_pending_removal(&self, company: &Company) -> BillingResult<Option<i64>> {
        let Some(pending) = company.billing.pending_addon_removal else {
            return Ok(None);
        };
        let Some(subscription_id) = company.billing.subscription_id.as_deref() else {
            return Ok(None);
        };

        let gateway_addon_id =
            plans::gateway_addon_id(company.billing.plan.as_str(), pending.addon_type)?;

        let updates = if pending.next_quantity == 0 {
            AddonUpdates {
                remove: vec![gateway_addon_id.to_string()],
                ..Default::default()
            }
        } else {
            AddonUpdates {
                update: vec![(gateway_addon_id.to_string(), pending.next_quantity)],
                ..Default::default()
            }
        };

        match self
            .gateway
            .update_addons(subscription_id, updates, false)
            .await
        {
            Ok(updated) => {
                self.store.clear_pending_addon_removal(company.id).await?;
                let sync = self.sync.sync_from_subscription(company.id, &updated).await?;
                tracing::info!(
                    company_id = %company.id,
                    addon = %pending.addon_type,
                    next_quantity = pending.next_quantity,
                    "Deferred add-on removal applied at renewal"
                );
                Ok(Some(sync.total_monthly_cost_cents))
            }
            Err(e) => {
                // Marker retained; the next renewal event retries.
                tracing::warn!(
                    company_id = %company.id,
                    addon = %pending.addon_type,
                    error = %e,
                    "Deferred add-on removal failed, will retry on next renewal"
                );
                Ok(None)
            }
        }
    }
}

fn status_override(kind: &str) -> Option<PaymentStatus> {
    if kind.contains("past_due") {
        Some(PaymentStatus::PastDue)
    } else if kind.contains("canceled") || kind.contains("expired") {
        Some(PaymentStatus::Canceled)
    } else {
        None
    }
}

fn is_renewal_kind(kind: &str) -> bool {
    kind.contains("charged_successfully")
}
