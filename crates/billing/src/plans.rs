//! Plan and add-on mapping
//!
//! Static tables translating internal (plan, add-on type) pairs to gateway
//! add-on identifiers, plus the exhaustive inverse. The inverse is derived
//! from the same table, so the two directions cannot drift apart; ids that
//! this system does not manage map to `None` rather than failing, since
//! webhook payloads may carry add-ons owned by other systems.

use shelfshare_shared::PlanTier;

use crate::error::{BillingError, BillingResult};
use crate::types::AddonType;

/// Plans a company may subscribe to. The free tier has no gateway
/// subscription and is rejected by `create_subscription`.
pub const PURCHASABLE_PLANS: [PlanTier; 2] = [PlanTier::Team, PlanTier::Network];

pub fn is_purchasable(plan: PlanTier) -> bool {
    PURCHASABLE_PLANS.contains(&plan)
}

/// Ordering of tiers for downgrade checks.
pub fn tier_rank(plan: PlanTier) -> u8 {
    match plan {
        PlanTier::Free => 0,
        PlanTier::Team => 1,
        PlanTier::Network => 2,
    }
}

/// Gateway plan identifier for an internal plan tier.
pub fn gateway_plan_id(plan: PlanTier) -> &'static str {
    match plan {
        PlanTier::Free => "shelfshare-free",
        PlanTier::Team => "shelfshare-team",
        PlanTier::Network => "shelfshare-network",
    }
}

/// Internal plan tier for a gateway plan identifier.
pub fn tier_for_gateway_plan_id(gateway_plan_id: &str) -> Option<PlanTier> {
    match gateway_plan_id {
        "shelfshare-free" => Some(PlanTier::Free),
        "shelfshare-team" => Some(PlanTier::Team),
        "shelfshare-network" => Some(PlanTier::Network),
        _ => None,
    }
}

/// (plan id, add-on type, gateway add-on id). One row per supported pair.
const ADDON_TABLE: [(&str, AddonType, &str); 6] = [
    ("free", AddonType::ExtraUser, "free-extrauser"),
    ("free", AddonType::ExtraConnection, "free-extraconnection"),
    ("team", AddonType::ExtraUser, "team-extrauser"),
    ("team", AddonType::ExtraConnection, "team-extraconnection"),
    ("network", AddonType::ExtraUser, "network-extrauser"),
    ("network", AddonType::ExtraConnection, "network-extraconnection"),
];

/// Resolve the gateway add-on id for a (plan, add-on type) pair.
///
/// A pair absent from the table is an error, not a default: silently
/// guessing here would bill the wrong add-on.
pub fn gateway_addon_id(plan_id: &str, addon: AddonType) -> BillingResult<&'static str> {
    ADDON_TABLE
        .iter()
        .find(|(p, a, _)| *p == plan_id && *a == addon)
        .map(|(_, _, id)| *id)
        .ok_or_else(|| {
            BillingError::InvalidAddonMapping(format!(
                "no gateway add-on configured for plan '{plan_id}' and add-on '{addon}'"
            ))
        })
}

/// Inverse lookup: the internal add-on type for a gateway add-on id.
/// Returns `None` for ids this system does not manage.
pub fn addon_type_for_gateway_id(gateway_addon_id: &str) -> Option<AddonType> {
    ADDON_TABLE
        .iter()
        .find(|(_, _, id)| *id == gateway_addon_id)
        .map(|(_, a, _)| *a)
}

/// Validate the mapping table at service construction: every supported
/// (plan, add-on type) pair must be present, and no gateway id may be
/// claimed by two rows. A bad table fails startup rather than surfacing
/// mid-request.
pub fn verify_addon_mappings() -> BillingResult<()> {
    for plan in [PlanTier::Free, PlanTier::Team, PlanTier::Network] {
        for addon in AddonType::all() {
            gateway_addon_id(plan.as_str(), addon)?;
        }
    }

    for (i, (_, _, id)) in ADDON_TABLE.iter().enumerate() {
        if ADDON_TABLE.iter().skip(i + 1).any(|(_, _, other)| other == id) {
            return Err(BillingError::Config(format!(
                "gateway add-on id '{id}' mapped more than once"
            )));
        }
    }

    Ok(())
}
