//! Subscription gateway abstraction
//!
//! Everything the billing layer needs from the payment provider, behind a
//! trait so services can be exercised against an in-memory fake. The
//! production implementation lives in `braintree`.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Subscription lifecycle state as reported by the gateway. Anything we do
/// not recognize is carried through as `Other` and treated conservatively
/// (mapped to past-due) by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewaySubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayAddon {
    pub id: String,
    pub amount_cents: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct GatewaySubscription {
    pub id: String,
    pub plan_id: String,
    pub status: GatewaySubscriptionStatus,
    /// Base plan price, before add-ons.
    pub price_cents: i64,
    pub add_ons: Vec<GatewayAddon>,
    pub next_billing_date: Option<OffsetDateTime>,
    pub paid_through_date: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct GatewayCustomer {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct GatewayPaymentMethod {
    pub token: String,
}

/// A batch of add-on mutations applied to a subscription in one gateway
/// call. Quantities in `update` are absolute, not deltas.
#[derive(Debug, Clone, Default)]
pub struct AddonUpdates {
    pub add: Vec<(String, i32)>,
    pub update: Vec<(String, i32)>,
    pub remove: Vec<String>,
}

/// A verified, decoded webhook notification.
#[derive(Debug, Clone)]
pub struct WebhookNotification {
    /// Gateway event kind, e.g. "subscription_charged_successfully".
    pub kind: String,
    pub subscription: Option<GatewaySubscription>,
    pub timestamp: OffsetDateTime,
}

#[async_trait]
pub trait SubscriptionGateway: Send + Sync {
    /// Client token for the browser drop-in. Scoped to a customer when one
    /// already exists so vaulted payment methods are offered.
    async fn generate_client_token(&self, customer_id: Option<&str>) -> BillingResult<String>;

    async fn create_customer(&self, company_id: Uuid, company_name: &str)
        -> BillingResult<GatewayCustomer>;

    async fn vault_payment_method(
        &self,
        customer_id: &str,
        payment_method_nonce: &str,
    ) -> BillingResult<GatewayPaymentMethod>;

    /// The customer's default payment method, if any is vaulted.
    async fn first_payment_method(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<GatewayPaymentMethod>>;

    async fn create_subscription(
        &self,
        payment_method_token: &str,
        gateway_plan_id: &str,
    ) -> BillingResult<GatewaySubscription>;

    async fn find_subscription(&self, subscription_id: &str) -> BillingResult<GatewaySubscription>;

    async fn update_addons(
        &self,
        subscription_id: &str,
        updates: AddonUpdates,
        prorate: bool,
    ) -> BillingResult<GatewaySubscription>;

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()>;

    /// Verify a webhook signature and decode the payload. Signature
    /// verification failures surface as `WebhookSignatureInvalid`.
    fn parse_webhook(&self, signature: &str, payload: &str) -> BillingResult<WebhookNotification>;
}
