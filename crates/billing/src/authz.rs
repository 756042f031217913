//! Authorization for billing operations
//!
//! Every callable operation passes through here before any gateway or store
//! mutation. Membership and role failures both report permission denied so a
//! caller cannot probe which companies exist.

use std::sync::Arc;

use uuid::Uuid;

use shelfshare_shared::UserRole;

use crate::error::{BillingError, BillingResult};
use crate::store::CompanyStore;
use crate::types::UserRecord;

pub struct BillingAuthorizer {
    store: Arc<dyn CompanyStore>,
}

impl BillingAuthorizer {
    pub fn new(store: Arc<dyn CompanyStore>) -> Self {
        Self { store }
    }

    /// Require the caller to be a billing admin (owner or admin) of the
    /// target company. Platform super-admins pass for any company.
    pub async fn require_billing_admin(
        &self,
        caller: Option<Uuid>,
        company_id: Uuid,
    ) -> BillingResult<UserRecord> {
        let caller = caller.ok_or(BillingError::Unauthenticated)?;

        let user = self
            .store
            .get_user(caller)
            .await?
            .ok_or_else(|| BillingError::PermissionDenied("unknown caller".to_string()))?;

        if user.role == UserRole::SuperAdmin {
            return Ok(user);
        }

        if user.company_id != company_id {
            tracing::warn!(
                user_id = %user.id,
                company_id = %company_id,
                "Billing operation denied: caller belongs to another company"
            );
            return Err(BillingError::PermissionDenied(
                "not a member of this company".to_string(),
            ));
        }

        if !user.role.is_billing_admin() {
            tracing::warn!(
                user_id = %user.id,
                company_id = %company_id,
                role = %user.role,
                "Billing operation denied: insufficient role"
            );
            return Err(BillingError::PermissionDenied(
                "billing operations require an owner or admin role".to_string(),
            ));
        }

        Ok(user)
    }
}
