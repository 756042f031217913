//! Billing domain types
//!
//! The billing snapshot embedded on a company record is a projection of the
//! last-seen gateway subscription; it is never independently authoritative.
//! All monetary amounts are integer cents.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use shelfshare_shared::{PaymentStatus, PlanTier, UserRole};

/// Purchasable add-on types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonType {
    /// Extra user seat beyond the plan's included limit
    ExtraUser,
    /// Extra trading-partner connection beyond the plan's included limit
    ExtraConnection,
}

impl AddonType {
    pub fn all() -> [Self; 2] {
        [Self::ExtraUser, Self::ExtraConnection]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtraUser => "extra_user",
            Self::ExtraConnection => "extra_connection",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "extra_user" => Some(Self::ExtraUser),
            "extra_connection" => Some(Self::ExtraConnection),
            _ => None,
        }
    }
}

impl std::fmt::Display for AddonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed two-key map of add-on quantities. A removed add-on shows as 0,
/// never as a stale previous value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonQuantities {
    pub extra_user: i32,
    pub extra_connection: i32,
}

impl AddonQuantities {
    pub fn quantity_of(&self, addon: AddonType) -> i32 {
        match addon {
            AddonType::ExtraUser => self.extra_user,
            AddonType::ExtraConnection => self.extra_connection,
        }
    }

    pub fn set(&mut self, addon: AddonType, quantity: i32) {
        match addon {
            AddonType::ExtraUser => self.extra_user = quantity,
            AddonType::ExtraConnection => self.extra_connection = quantity,
        }
    }
}

/// A scheduled plan downgrade, applied at the renewal boundary.
/// At most one per company; mutually exclusive with an in-flight plan change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPlanChange {
    pub next_plan: PlanTier,
    pub effective_at: OffsetDateTime,
}

/// A deferred add-on removal, executed on the next renewal webhook.
/// The customer keeps the paid-for capacity until the period they already
/// paid for ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAddonRemoval {
    pub addon_type: AddonType,
    pub next_quantity: i32,
    pub effective_at: OffsetDateTime,
}

/// Company-embedded billing snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingSnapshot {
    pub plan: PlanTier,
    pub subscription_id: Option<String>,
    pub gateway_customer_id: Option<String>,
    pub payment_status: PaymentStatus,
    pub renewal_date: Option<OffsetDateTime>,
    pub billing_period_end: Option<OffsetDateTime>,
    /// Derived, recomputed on every sync. Never independently mutated.
    pub total_monthly_cost_cents: i64,
    pub addons: AddonQuantities,
    pub pending_change: Option<PendingPlanChange>,
    pub pending_addon_removal: Option<PendingAddonRemoval>,
    /// Plan-change mutual exclusion. Acquired via conditional update,
    /// released unconditionally after the sequence (success or failure).
    pub plan_change_in_progress: bool,
    pub canceled_at: Option<OffsetDateTime>,
}

impl Default for BillingSnapshot {
    fn default() -> Self {
        Self {
            plan: PlanTier::Free,
            subscription_id: None,
            gateway_customer_id: None,
            payment_status: PaymentStatus::Active,
            renewal_date: None,
            billing_period_end: None,
            total_monthly_cost_cents: 0,
            addons: AddonQuantities::default(),
            pending_change: None,
            pending_addon_removal: None,
            plan_change_in_progress: false,
            canceled_at: None,
        }
    }
}

/// Partial billing write, merged over the stored snapshot. `None` fields are
/// left untouched; pending markers and the in-flight lock have dedicated
/// store operations and are never written through a patch.
#[derive(Debug, Clone, Default)]
pub struct BillingPatch {
    pub plan: Option<PlanTier>,
    pub subscription_id: Option<String>,
    pub gateway_customer_id: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub renewal_date: Option<OffsetDateTime>,
    pub billing_period_end: Option<OffsetDateTime>,
    pub total_monthly_cost_cents: Option<i64>,
    pub addons: Option<AddonQuantities>,
    pub canceled_at: Option<OffsetDateTime>,
}

impl BillingPatch {
    /// Apply this patch over a snapshot, in place.
    pub fn apply_to(&self, snapshot: &mut BillingSnapshot) {
        if let Some(plan) = self.plan {
            snapshot.plan = plan;
        }
        if let Some(ref id) = self.subscription_id {
            snapshot.subscription_id = Some(id.clone());
        }
        if let Some(ref id) = self.gateway_customer_id {
            snapshot.gateway_customer_id = Some(id.clone());
        }
        if let Some(status) = self.payment_status {
            snapshot.payment_status = status;
        }
        if let Some(date) = self.renewal_date {
            snapshot.renewal_date = Some(date);
        }
        if let Some(date) = self.billing_period_end {
            snapshot.billing_period_end = Some(date);
        }
        if let Some(cents) = self.total_monthly_cost_cents {
            snapshot.total_monthly_cost_cents = cents;
        }
        if let Some(addons) = self.addons {
            snapshot.addons = addons;
        }
        if let Some(at) = self.canceled_at {
            snapshot.canceled_at = Some(at);
        }
    }
}

/// A company (tenant) as seen by the billing subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub user_limit: i32,
    pub connection_limit: i32,
    pub billing: BillingSnapshot,
}

/// A user record, looked up for authorization checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub company_id: Uuid,
    pub email: String,
    pub role: UserRole,
}

/// Plan catalog entry. Read-only from this subsystem's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanCatalogEntry {
    pub plan_id: PlanTier,
    pub gateway_plan_id: String,
    pub user_limit: i32,
    pub connection_limit: i32,
}

/// Immutable audit record appended by the webhook path. Write-only; never
/// read back by this subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct BillingAuditRecord {
    pub company_id: Uuid,
    pub subscription_id: String,
    pub event_kind: String,
    pub payment_status: PaymentStatus,
    pub total_monthly_cost_cents: i64,
}
