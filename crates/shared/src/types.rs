//! Core shared types: plan tiers, user roles, payment status.

use serde::{Deserialize, Serialize};

/// Subscription plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Free tier: 2 users, 1 trading-partner connection
    Free,
    /// Team tier: 10 users, 5 connections
    Team,
    /// Network tier: 50 users, 25 connections
    Network,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Team => "team",
            PlanTier::Network => "network",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "free" => Some(PlanTier::Free),
            "team" => Some(PlanTier::Team),
            "network" => Some(PlanTier::Network),
            _ => None,
        }
    }

    /// Included user seats for this tier
    pub fn user_limit(&self) -> u32 {
        match self {
            PlanTier::Free => 2,
            PlanTier::Team => 10,
            PlanTier::Network => 50,
        }
    }

    /// Included trading-partner connections for this tier
    pub fn connection_limit(&self) -> u32 {
        match self {
            PlanTier::Free => 1,
            PlanTier::Team => 5,
            PlanTier::Network => 25,
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role of a user within their company
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserRole {
    Member,
    Admin,
    Owner,
    SuperAdmin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Member => "member",
            UserRole::Admin => "admin",
            UserRole::Owner => "owner",
            UserRole::SuperAdmin => "super-admin",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "member" => Some(UserRole::Member),
            "admin" => Some(UserRole::Admin),
            "owner" => Some(UserRole::Owner),
            "super-admin" => Some(UserRole::SuperAdmin),
            _ => None,
        }
    }

    /// Whether this role may perform privileged billing mutations
    pub fn is_billing_admin(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Owner | UserRole::SuperAdmin)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment status of a company's subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Active,
    PastDue,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Active => "active",
            PaymentStatus::PastDue => "past_due",
            PaymentStatus::Canceled => "canceled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PaymentStatus::Active),
            "past_due" => Some(PaymentStatus::PastDue),
            "canceled" => Some(PaymentStatus::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_tier_round_trips() {
        for tier in [PlanTier::Free, PlanTier::Team, PlanTier::Network] {
            assert_eq!(PlanTier::from_str(tier.as_str()), Some(tier));
        }
        assert_eq!(PlanTier::from_str("enterprise"), None);
    }

    #[test]
    fn billing_admin_roles() {
        assert!(!UserRole::Member.is_billing_admin());
        assert!(UserRole::Admin.is_billing_admin());
        assert!(UserRole::Owner.is_billing_admin());
        assert!(UserRole::SuperAdmin.is_billing_admin());
    }

    #[test]
    fn super_admin_uses_kebab_case() {
        assert_eq!(UserRole::from_str("super-admin"), Some(UserRole::SuperAdmin));
        assert_eq!(UserRole::SuperAdmin.as_str(), "super-admin");
    }

    #[test]
    fn tier_limits_are_ordered() {
        assert!(PlanTier::Free.user_limit() < PlanTier::Team.user_limit());
        assert!(PlanTier::Team.user_limit() < PlanTier::Network.user_limit());
        assert!(PlanTier::Free.connection_limit() < PlanTier::Team.connection_limit());
    }
}
