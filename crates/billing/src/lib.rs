// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ShelfShare Billing Module
//!
//! Braintree integration for company subscriptions.
//!
//! ## Features
//!
//! - **Subscription Management**: Create, change plan, cancel subscriptions
//! - **Add-ons**: Extra user seats and trading-partner connections, with
//!   deferred removal at renewal
//! - **Scheduled Downgrades**: Plan downgrades applied at the renewal boundary
//! - **Synchronizer**: Single write path from gateway state to the stored
//!   billing snapshot
//! - **Webhooks**: Signature-verified gateway events, audit trail, deferred
//!   removal execution
//! - **Invariants**: Runnable consistency checks over the billing columns

pub mod authz;
pub mod braintree;
pub mod error;
pub mod gateway;
pub mod invariants;
pub mod plans;
pub mod store;
pub mod subscriptions;
pub mod sync;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use sqlx::PgPool;

// Authorization
pub use authz::BillingAuthorizer;

// Gateway client
pub use braintree::{BraintreeClient, BraintreeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Gateway abstraction
pub use gateway::{
    AddonUpdates, GatewayAddon, GatewayCustomer, GatewayPaymentMethod, GatewaySubscription,
    GatewaySubscriptionStatus, SubscriptionGateway, WebhookNotification,
};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Store
pub use store::{AuditLog, CompanyStore, PgStore, PlanCatalog, WebhookJournal};

// Subscriptions
pub use subscriptions::{
    AddonChangeResult, CancelSubscriptionResult, ClientTokenResponse, CreateSubscriptionResult,
    PlanChangeResult, RemoveAddonResult, ScheduledDowngrade, SubscriptionService,
};

// Synchronizer
pub use sync::{BillingSynchronizer, SyncOutcome};

// Types
pub use types::{
    AddonQuantities, AddonType, BillingAuditRecord, BillingPatch, BillingSnapshot, Company,
    PendingAddonRemoval, PendingPlanChange, PlanCatalogEntry, UserRecord,
};

// Webhooks
pub use webhooks::{WebhookHandler, WebhookOutcome};

/// Facade bundling the billing services for the API layer.
pub struct BillingService {
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
    pub invariants: InvariantChecker,
}

impl BillingService {
    /// Create a billing service from environment variables. Fails fast on
    /// missing gateway credentials or an inconsistent add-on mapping table.
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Self::verify_configuration()?;
        let gateway = Arc::new(BraintreeClient::from_env()?);
        Ok(Self::new(gateway, pool))
    }

    pub fn new(gateway: Arc<dyn SubscriptionGateway>, pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        Self::with_store(
            gateway,
            Arc::clone(&store) as Arc<dyn CompanyStore>,
            Arc::clone(&store) as Arc<dyn PlanCatalog>,
            Arc::clone(&store) as Arc<dyn AuditLog>,
            store as Arc<dyn WebhookJournal>,
            pool,
        )
    }

    pub fn with_store(
        gateway: Arc<dyn SubscriptionGateway>,
        store: Arc<dyn CompanyStore>,
        catalog: Arc<dyn PlanCatalog>,
        audit: Arc<dyn AuditLog>,
        journal: Arc<dyn WebhookJournal>,
        pool: PgPool,
    ) -> Self {
        Self {
            subscriptions: SubscriptionService::new(
                Arc::clone(&gateway),
                Arc::clone(&store),
                Arc::clone(&catalog),
            ),
            webhooks: WebhookHandler::new(gateway, store, catalog, audit, journal),
            invariants: InvariantChecker::new(pool),
        }
    }

    /// Startup validation. The mapping table must cover every supported
    /// (plan, add-on type) pair before any request is served.
    pub fn verify_configuration() -> BillingResult<()> {
        plans::verify_addon_mappings()
    }
}
