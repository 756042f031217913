//! In-memory fakes for exercising the billing services without Postgres or
//! network access. The store fake honors the same merge and CAS semantics as
//! the Postgres implementation; the gateway fake counts every call so tests
//! can assert that denied or deferred operations never reach the provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use shelfshare_shared::{PlanTier, UserRole};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    AddonUpdates, GatewayAddon, GatewayCustomer, GatewayPaymentMethod, GatewaySubscription,
    GatewaySubscriptionStatus, SubscriptionGateway, WebhookNotification,
};
use crate::store::{AuditLog, CompanyStore, PlanCatalog, WebhookJournal};
use crate::types::{
    BillingAuditRecord, BillingPatch, BillingSnapshot, Company, PendingAddonRemoval,
    PendingPlanChange, PlanCatalogEntry, UserRecord,
};

pub fn fixture_company(name: &str) -> Company {
    Company {
        id: Uuid::new_v4(),
        name: name.to_string(),
        user_limit: 2,
        connection_limit: 1,
        billing: BillingSnapshot::default(),
    }
}

pub fn admin_of(store: &InMemoryStore, company: &Company) -> Uuid {
    store.insert_user(company, UserRole::Admin)
}

pub fn member_of(store: &InMemoryStore, company: &Company) -> Uuid {
    store.insert_user(company, UserRole::Member)
}

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub kind: String,
    pub subscription_id: Option<String>,
    pub outcome: String,
    pub error: Option<String>,
}

pub struct InMemoryStore {
    companies: Mutex<HashMap<Uuid, Company>>,
    users: Mutex<HashMap<Uuid, UserRecord>>,
    plans: Vec<PlanCatalogEntry>,
    audit: Mutex<Vec<BillingAuditRecord>>,
    journal: Mutex<Vec<JournalEntry>>,
    fail_merges: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let plans = vec![
            PlanCatalogEntry {
                plan_id: PlanTier::Free,
                gateway_plan_id: "shelfshare-free".to_string(),
                user_limit: 2,
                connection_limit: 1,
            },
            PlanCatalogEntry {
                plan_id: PlanTier::Team,
                gateway_plan_id: "shelfshare-team".to_string(),
                user_limit: 10,
                connection_limit: 5,
            },
            PlanCatalogEntry {
                plan_id: PlanTier::Network,
                gateway_plan_id: "shelfshare-network".to_string(),
                user_limit: 50,
                connection_limit: 25,
            },
        ];
        Self {
            companies: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            plans,
            audit: Mutex::new(Vec::new()),
            journal: Mutex::new(Vec::new()),
            fail_merges: AtomicBool::new(false),
        }
    }

    pub fn insert_company(&self, company: Company) {
        self.companies.lock().unwrap().insert(company.id, company);
    }

    pub fn insert_user(&self, company: &Company, role: UserRole) -> Uuid {
        let id = Uuid::new_v4();
        self.users.lock().unwrap().insert(
            id,
            UserRecord {
                id,
                company_id: company.id,
                email: format!("{id}@example.test"),
                role,
            },
        );
        id
    }

    pub fn company(&self, company_id: Uuid) -> Company {
        self.companies
            .lock()
            .unwrap()
            .get(&company_id)
            .cloned()
            .expect("fixture company not found")
    }

    pub fn audit_entries(&self) -> Vec<BillingAuditRecord> {
        self.audit.lock().unwrap().clone()
    }

    pub fn journal_entries(&self) -> Vec<JournalEntry> {
        self.journal.lock().unwrap().clone()
    }

    /// Make every subsequent merge fail, for failure-path tests.
    pub fn fail_merges(&self) {
        self.fail_merges.store(true, Ordering::SeqCst);
    }

    fn with_company<T>(
        &self,
        company_id: Uuid,
        f: impl FnOnce(&mut Company) -> T,
    ) -> BillingResult<T> {
        let mut companies = self.companies.lock().unwrap();
        let company = companies
            .get_mut(&company_id)
            .ok_or_else(|| BillingError::NotFound(format!("company {company_id}")))?;
        Ok(f(company))
    }
}

#[async_trait]
impl CompanyStore for InMemoryStore {
    async fn get_company(&self, company_id: Uuid) -> BillingResult<Option<Company>> {
        Ok(self.companies.lock().unwrap().get(&company_id).cloned())
    }

    async fn get_user(&self, user_id: Uuid) -> BillingResult<Option<UserRecord>> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }

    async fn find_company_by_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<Company>> {
        Ok(self
            .companies
            .lock()
            .unwrap()
            .values()
            .find(|c| c.billing.subscription_id.as_deref() == Some(subscription_id))
            .cloned())
    }

    async fn merge_billing(&self, company_id: Uuid, patch: BillingPatch) -> BillingResult<()> {
        if self.fail_merges.load(Ordering::SeqCst) {
            return Err(BillingError::Database("injected merge failure".to_string()));
        }
        self.with_company(company_id, |c| patch.apply_to(&mut c.billing))
    }

    async fn update_limits(
        &self,
        company_id: Uuid,
        user_limit: i32,
        connection_limit: i32,
    ) -> BillingResult<()> {
        self.with_company(company_id, |c| {
            c.user_limit = user_limit;
            c.connection_limit = connection_limit;
        })
    }

    async fn try_begin_plan_change(&self, company_id: Uuid) -> BillingResult<bool> {
        // Single atomic step under the map lock, like the conditional UPDATE.
        self.with_company(company_id, |c| {
            if c.billing.plan_change_in_progress {
                false
            } else {
                c.billing.plan_change_in_progress = true;
                true
            }
        })
    }

    async fn end_plan_change(&self, company_id: Uuid) -> BillingResult<()> {
        self.with_company(company_id, |c| c.billing.plan_change_in_progress = false)
    }

    async fn set_pending_change(
        &self,
        company_id: Uuid,
        change: PendingPlanChange,
    ) -> BillingResult<()> {
        self.with_company(company_id, |c| c.billing.pending_change = Some(change))
    }

    async fn clear_pending_change(&self, company_id: Uuid) -> BillingResult<()> {
        self.with_company(company_id, |c| c.billing.pending_change = None)
    }

    async fn set_pending_addon_removal(
        &self,
        company_id: Uuid,
        removal: PendingAddonRemoval,
    ) -> BillingResult<()> {
        self.with_company(company_id, |c| {
            c.billing.pending_addon_removal = Some(removal)
        })
    }

    async fn clear_pending_addon_removal(&self, company_id: Uuid) -> BillingResult<()> {
        self.with_company(company_id, |c| c.billing.pending_addon_removal = None)
    }
}

#[async_trait]
impl PlanCatalog for InMemoryStore {
    async fn find_by_gateway_plan_id(
        &self,
        gateway_plan_id: &str,
    ) -> BillingResult<Option<PlanCatalogEntry>> {
        Ok(self
            .plans
            .iter()
            .find(|p| p.gateway_plan_id == gateway_plan_id)
            .cloned())
    }
}

#[async_trait]
impl AuditLog for InMemoryStore {
    async fn append(&self, record: &BillingAuditRecord) -> BillingResult<()> {
        self.audit.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl WebhookJournal for InMemoryStore {
    async fn record(
        &self,
        event_kind: &str,
        subscription_id: Option<&str>,
        outcome: &str,
        error: Option<&str>,
    ) -> BillingResult<()> {
        self.journal.lock().unwrap().push(JournalEntry {
            kind: event_kind.to_string(),
            subscription_id: subscription_id.map(str::to_string),
            outcome: outcome.to_string(),
            error: error.map(str::to_string),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CallCounts {
    pub client_token: u32,
    pub create_customer: u32,
    pub vault_payment_method: u32,
    pub first_payment_method: u32,
    pub create_subscription: u32,
    pub find_subscription: u32,
    pub update_addons: u32,
    pub cancel_subscription: u32,
}

impl CallCounts {
    pub fn total(&self) -> u32 {
        self.client_token
            + self.create_customer
            + self.vault_payment_method
            + self.first_payment_method
            + self.create_subscription
            + self.find_subscription
            + self.update_addons
            + self.cancel_subscription
    }
}

pub struct FakeGateway {
    subscriptions: Mutex<HashMap<String, GatewaySubscription>>,
    calls: Mutex<CallCounts>,
    seq: AtomicU32,
    carried_addons: Mutex<Vec<GatewayAddon>>,
    scripted_webhook: Mutex<Option<WebhookNotification>>,
    fail_vault: AtomicBool,
    fail_update_addons: AtomicBool,
    fail_cancel: AtomicBool,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            calls: Mutex::new(CallCounts::default()),
            seq: AtomicU32::new(0),
            carried_addons: Mutex::new(Vec::new()),
            scripted_webhook: Mutex::new(None),
            fail_vault: AtomicBool::new(false),
            fail_update_addons: AtomicBool::new(false),
            fail_cancel: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> CallCounts {
        *self.calls.lock().unwrap()
    }

    pub fn seed_subscription(&self, plan_id: &str, price_cents: i64) -> String {
        self.seed_subscription_with_addons(plan_id, price_cents, Vec::new())
    }

    pub fn seed_subscription_with_addons(
        &self,
        plan_id: &str,
        price_cents: i64,
        add_ons: Vec<GatewayAddon>,
    ) -> String {
        let id = self.next_id();
        self.subscriptions.lock().unwrap().insert(
            id.clone(),
            GatewaySubscription {
                id: id.clone(),
                plan_id: plan_id.to_string(),
                status: GatewaySubscriptionStatus::Active,
                price_cents,
                add_ons,
                next_billing_date: Some(OffsetDateTime::now_utc() + time::Duration::days(30)),
                paid_through_date: Some(OffsetDateTime::now_utc() + time::Duration::days(30)),
            },
        );
        id
    }

    /// Newly created subscriptions will carry these add-ons, simulating the
    /// gateway copying add-ons from a plan's defaults.
    pub fn carry_addons_on_create(&self, add_ons: Vec<GatewayAddon>) {
        *self.carried_addons.lock().unwrap() = add_ons;
    }

    pub fn script_webhook(&self, notification: WebhookNotification) {
        *self.scripted_webhook.lock().unwrap() = Some(notification);
    }

    pub fn fail_vault_payment_method(&self) {
        self.fail_vault.store(true, Ordering::SeqCst);
    }

    pub fn fail_update_addons(&self) {
        self.fail_update_addons.store(true, Ordering::SeqCst);
    }

    pub fn fail_cancel_subscription(&self) {
        self.fail_cancel.store(true, Ordering::SeqCst);
    }

    pub fn subscription_status(&self, subscription_id: &str) -> GatewaySubscriptionStatus {
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .map(|s| s.status.clone())
            .expect("unknown fake subscription")
    }

    fn next_id(&self) -> String {
        format!("sub_fake_{}", self.seq.fetch_add(1, Ordering::SeqCst))
    }

    fn plan_price_cents(plan_id: &str) -> i64 {
        match plan_id {
            "shelfshare-team" => 2900,
            "shelfshare-network" => 9900,
            _ => 0,
        }
    }

    fn addon_amount_cents(addon_id: &str) -> i64 {
        if addon_id.ends_with("extrauser") {
            500
        } else {
            250
        }
    }
}

#[async_trait]
impl SubscriptionGateway for FakeGateway {
    async fn generate_client_token(&self, customer_id: Option<&str>) -> BillingResult<String> {
        self.calls.lock().unwrap().client_token += 1;
        Ok(match customer_id {
            Some(id) => format!("token-for-{id}"),
            None => "token-anonymous".to_string(),
        })
    }

    async fn create_customer(
        &self,
        _company_id: Uuid,
        company_name: &str,
    ) -> BillingResult<GatewayCustomer> {
        self.calls.lock().unwrap().create_customer += 1;
        Ok(GatewayCustomer {
            id: format!("cust_fake_{company_name}"),
        })
    }

    async fn vault_payment_method(
        &self,
        customer_id: &str,
        _payment_method_nonce: &str,
    ) -> BillingResult<GatewayPaymentMethod> {
        self.calls.lock().unwrap().vault_payment_method += 1;
        if self.fail_vault.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway("vault rejected the nonce".to_string()));
        }
        Ok(GatewayPaymentMethod {
            token: format!("pm_{customer_id}"),
        })
    }

    async fn first_payment_method(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<GatewayPaymentMethod>> {
        self.calls.lock().unwrap().first_payment_method += 1;
        Ok(Some(GatewayPaymentMethod {
            token: format!("pm_{customer_id}"),
        }))
    }

    async fn create_subscription(
        &self,
        _payment_method_token: &str,
        gateway_plan_id: &str,
    ) -> BillingResult<GatewaySubscription> {
        self.calls.lock().unwrap().create_subscription += 1;
        let id = self.next_id();
        let subscription = GatewaySubscription {
            id: id.clone(),
            plan_id: gateway_plan_id.to_string(),
            status: GatewaySubscriptionStatus::Active,
            price_cents: Self::plan_price_cents(gateway_plan_id),
            add_ons: self.carried_addons.lock().unwrap().clone(),
            next_billing_date: Some(OffsetDateTime::now_utc() + time::Duration::days(30)),
            paid_through_date: Some(OffsetDateTime::now_utc() + time::Duration::days(30)),
        };
        self.subscriptions
            .lock()
            .unwrap()
            .insert(id, subscription.clone());
        Ok(subscription)
    }

    async fn find_subscription(&self, subscription_id: &str) -> BillingResult<GatewaySubscription> {
        self.calls.lock().unwrap().find_subscription += 1;
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("subscription {subscription_id}")))
    }

    async fn update_addons(
        &self,
        subscription_id: &str,
        updates: AddonUpdates,
        _prorate: bool,
    ) -> BillingResult<GatewaySubscription> {
        self.calls.lock().unwrap().update_addons += 1;
        if self.fail_update_addons.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway(
                "add-on update rejected".to_string(),
            ));
        }

        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| BillingError::NotFound(format!("subscription {subscription_id}")))?;

        for (id, quantity) in &updates.add {
            subscription.add_ons.push(GatewayAddon {
                id: id.clone(),
                amount_cents: Self::addon_amount_cents(id),
                quantity: *quantity,
            });
        }
        for (id, quantity) in &updates.update {
            if let Some(addon) = subscription.add_ons.iter_mut().find(|a| &a.id == id) {
                addon.quantity = *quantity;
            }
        }
        subscription
            .add_ons
            .retain(|a| !updates.remove.contains(&a.id));

        Ok(subscription.clone())
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()> {
        self.calls.lock().unwrap().cancel_subscription += 1;
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway("cancel rejected".to_string()));
        }
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| BillingError::NotFound(format!("subscription {subscription_id}")))?;
        subscription.status = GatewaySubscriptionStatus::Canceled;
        Ok(())
    }

    fn parse_webhook(&self, signature: &str, _payload: &str) -> BillingResult<WebhookNotification> {
        if signature != "valid-signature" {
            return Err(BillingError::WebhookSignatureInvalid);
        }
        Ok(self
            .scripted_webhook
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(WebhookNotification {
                kind: "check".to_string(),
                subscription: None,
                timestamp: OffsetDateTime::now_utc(),
            }))
    }
}
