//! Billing error types
//!
//! Every callable operation surfaces one of the user-distinguishable error
//! codes returned by [`BillingError::code`]. Infrastructure failures
//! (gateway, database, config) all collapse to `internal` at the boundary;
//! their message detail stays server-side in logs.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// No calling principal was supplied.
    #[error("authentication required")]
    Unauthenticated,

    /// Principal authenticated but not a member/admin of the target company.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Missing or malformed required fields, or a plan outside the allow-list.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted against invalid state (no subscription, plan
    /// change in flight, downgrade already scheduled, ...).
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A (plan, add-on type) pair absent from the static mapping table.
    /// Deliberate fail-fast so we never bill the wrong add-on.
    #[error("invalid add-on mapping: {0}")]
    InvalidAddonMapping(String),

    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// User-visible error code for callable responses.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Unauthenticated => "unauthenticated",
            BillingError::PermissionDenied(_) => "permission-denied",
            BillingError::InvalidArgument(_) => "invalid-argument",
            BillingError::FailedPrecondition(_) => "failed-precondition",
            BillingError::NotFound(_) => "not-found",
            BillingError::InvalidAddonMapping(_)
            | BillingError::WebhookSignatureInvalid
            | BillingError::Gateway(_)
            | BillingError::Database(_)
            | BillingError::Config(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(BillingError::Unauthenticated.code(), "unauthenticated");
        assert_eq!(
            BillingError::PermissionDenied("x".into()).code(),
            "permission-denied"
        );
        assert_eq!(
            BillingError::InvalidArgument("x".into()).code(),
            "invalid-argument"
        );
        assert_eq!(
            BillingError::FailedPrecondition("x".into()).code(),
            "failed-precondition"
        );
        assert_eq!(BillingError::NotFound("x".into()).code(), "not-found");
    }

    #[test]
    fn infrastructure_failures_collapse_to_internal() {
        assert_eq!(BillingError::Gateway("boom".into()).code(), "internal");
        assert_eq!(BillingError::Database("boom".into()).code(), "internal");
        assert_eq!(BillingError::Config("boom".into()).code(), "internal");
        assert_eq!(BillingError::WebhookSignatureInvalid.code(), "internal");
        assert_eq!(
            BillingError::InvalidAddonMapping("boom".into()).code(),
            "internal"
        );
    }
}
