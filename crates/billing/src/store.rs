//! Persistence traits and the Postgres implementation
//!
//! Services talk to these traits, never to the pool directly, so the whole
//! billing layer runs against in-memory fakes in tests. Pending markers and
//! the plan-change lock have dedicated operations: they are control state,
//! not snapshot data, and must never be written through a merge patch.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use shelfshare_shared::{PaymentStatus, PlanTier, UserRole};

use crate::error::{BillingError, BillingResult};
use crate::types::{
    AddonQuantities, AddonType, BillingAuditRecord, BillingPatch, BillingSnapshot, Company,
    PendingAddonRemoval, PendingPlanChange, PlanCatalogEntry, UserRecord,
};

#[async_trait]
pub trait CompanyStore: Send + Sync {
    async fn get_company(&self, company_id: Uuid) -> BillingResult<Option<Company>>;

    async fn get_user(&self, user_id: Uuid) -> BillingResult<Option<UserRecord>>;

    async fn find_company_by_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<Company>>;

    /// Merge a partial billing write over the stored snapshot. Fields absent
    /// from the patch keep their stored values.
    async fn merge_billing(&self, company_id: Uuid, patch: BillingPatch) -> BillingResult<()>;

    async fn update_limits(
        &self,
        company_id: Uuid,
        user_limit: i32,
        connection_limit: i32,
    ) -> BillingResult<()>;

    /// Acquire the plan-change lock. Returns false when another change is
    /// already in flight. Compare-and-set, not read-then-write.
    async fn try_begin_plan_change(&self, company_id: Uuid) -> BillingResult<bool>;

    /// Release the plan-change lock. Idempotent.
    async fn end_plan_change(&self, company_id: Uuid) -> BillingResult<()>;

    async fn set_pending_change(
        &self,
        company_id: Uuid,
        change: PendingPlanChange,
    ) -> BillingResult<()>;

    async fn clear_pending_change(&self, company_id: Uuid) -> BillingResult<()>;

    async fn set_pending_addon_removal(
        &self,
        company_id: Uuid,
        removal: PendingAddonRemoval,
    ) -> BillingResult<()>;

    async fn clear_pending_addon_removal(&self, company_id: Uuid) -> BillingResult<()>;
}

#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn find_by_gateway_plan_id(
        &self,
        gateway_plan_id: &str,
    ) -> BillingResult<Option<PlanCatalogEntry>>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: &BillingAuditRecord) -> BillingResult<()>;
}

#[async_trait]
pub trait WebhookJournal: Send + Sync {
    async fn record(
        &self,
        event_kind: &str,
        subscription_id: Option<&str>,
        outcome: &str,
        error: Option<&str>,
    ) -> BillingResult<()>;
}

/// Postgres-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CompanyRow {
    id: Uuid,
    name: String,
    user_limit: i32,
    connection_limit: i32,
    plan: String,
    subscription_id: Option<String>,
    gateway_customer_id: Option<String>,
    payment_status: String,
    renewal_date: Option<OffsetDateTime>,
    billing_period_end: Option<OffsetDateTime>,
    total_monthly_cost_cents: i64,
    addon_extra_user: i32,
    addon_extra_connection: i32,
    pending_change_plan: Option<String>,
    pending_change_effective_at: Option<OffsetDateTime>,
    pending_removal_addon: Option<String>,
    pending_removal_next_quantity: Option<i32>,
    pending_removal_effective_at: Option<OffsetDateTime>,
    plan_change_in_progress: bool,
    canceled_at: Option<OffsetDateTime>,
}

const COMPANY_COLUMNS: &str = "id, name, user_limit, connection_limit, plan, subscription_id, \
     gateway_customer_id, payment_status, renewal_date, billing_period_end, \
     total_monthly_cost_cents, addon_extra_user, addon_extra_connection, \
     pending_change_plan, pending_change_effective_at, pending_removal_addon, \
     pending_removal_next_quantity, pending_removal_effective_at, \
     plan_change_in_progress, canceled_at";

impl CompanyRow {
    fn into_company(self) -> BillingResult<Company> {
        let plan = PlanTier::from_str(&self.plan).ok_or_else(|| {
            BillingError::Database(format!("company {} has unknown plan '{}'", self.id, self.plan))
        })?;
        let payment_status = PaymentStatus::from_str(&self.payment_status).ok_or_else(|| {
            BillingError::Database(format!(
                "company {} has unknown payment status '{}'",
                self.id, self.payment_status
            ))
        })?;

        let pending_change = match (self.pending_change_plan, self.pending_change_effective_at) {
            (Some(next), Some(at)) => Some(PendingPlanChange {
                next_plan: PlanTier::from_str(&next).ok_or_else(|| {
                    BillingError::Database(format!("unknown pending plan '{next}'"))
                })?,
                effective_at: at,
            }),
            _ => None,
        };

        let pending_addon_removal = match (
            self.pending_removal_addon,
            self.pending_removal_next_quantity,
            self.pending_removal_effective_at,
        ) {
            (Some(addon), Some(next_quantity), Some(at)) => Some(PendingAddonRemoval {
                addon_type: AddonType::from_str(&addon).ok_or_else(|| {
                    BillingError::Database(format!("unknown pending add-on '{addon}'"))
                })?,
                next_quantity,
                effective_at: at,
            }),
            _ => None,
        };

        Ok(Company {
            id: self.id,
            name: self.name,
            user_limit: self.user_limit,
            connection_limit: self.connection_limit,
            billing: BillingSnapshot {
                plan,
                subscription_id: self.subscription_id,
                gateway_customer_id: self.gateway_customer_id,
                payment_status,
                renewal_date: self.renewal_date,
                billing_period_end: self.billing_period_end,
                total_monthly_cost_cents: self.total_monthly_cost_cents,
                addons: AddonQuantities {
                    extra_user: self.addon_extra_user,
                    extra_connection: self.addon_extra_connection,
                },
                pending_change,
                pending_addon_removal,
                plan_change_in_progress: self.plan_change_in_progress,
                canceled_at: self.canceled_at,
            },
        })
    }
}

#[async_trait]
impl CompanyStore for PgStore {
    async fn get_company(&self, company_id: Uuid) -> BillingResult<Option<Company>> {
        let row: Option<CompanyRow> = sqlx::query_as(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE id = $1"
        ))
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CompanyRow::into_company).transpose()
    }

    async fn get_user(&self, user_id: Uuid) -> BillingResult<Option<UserRecord>> {
        let row: Option<(Uuid, Uuid, String, String)> =
            sqlx::query_as("SELECT id, company_id, email, role FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(id, company_id, email, role)| {
            Ok(UserRecord {
                id,
                company_id,
                email,
                role: UserRole::from_str(&role).ok_or_else(|| {
                    BillingError::Database(format!("user {id} has unknown role '{role}'"))
                })?,
            })
        })
        .transpose()
    }

    async fn find_company_by_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<Company>> {
        let row: Option<CompanyRow> = sqlx::query_as(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE subscription_id = $1"
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CompanyRow::into_company).transpose()
    }

    async fn merge_billing(&self, company_id: Uuid, patch: BillingPatch) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        let row: Option<CompanyRow> = sqlx::query_as(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE id = $1 FOR UPDATE"
        ))
        .bind(company_id)
        .fetch_optional(&mut *tx)
        .await?;

        let company = row
            .ok_or_else(|| BillingError::NotFound(format!("company {company_id}")))?
            .into_company()?;

        let mut snapshot = company.billing;
        patch.apply_to(&mut snapshot);

        sqlx::query(
            "UPDATE companies SET \
                 plan = $2, subscription_id = $3, gateway_customer_id = $4, \
                 payment_status = $5, renewal_date = $6, billing_period_end = $7, \
                 total_monthly_cost_cents = $8, addon_extra_user = $9, \
                 addon_extra_connection = $10, canceled_at = $11, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(company_id)
        .bind(snapshot.plan.as_str())
        .bind(&snapshot.subscription_id)
        .bind(&snapshot.gateway_customer_id)
        .bind(snapshot.payment_status.as_str())
        .bind(snapshot.renewal_date)
        .bind(snapshot.billing_period_end)
        .bind(snapshot.total_monthly_cost_cents)
        .bind(snapshot.addons.extra_user)
        .bind(snapshot.addons.extra_connection)
        .bind(snapshot.canceled_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_limits(
        &self,
        company_id: Uuid,
        user_limit: i32,
        connection_limit: i32,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE companies SET user_limit = $2, connection_limit = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(company_id)
        .bind(user_limit)
        .bind(connection_limit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_begin_plan_change(&self, company_id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query(
            "UPDATE companies SET plan_change_in_progress = TRUE, updated_at = NOW() \
             WHERE id = $1 AND plan_change_in_progress = FALSE",
        )
        .bind(company_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn end_plan_change(&self, company_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            "UPDATE companies SET plan_change_in_progress = FALSE, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(company_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_pending_change(
        &self,
        company_id: Uuid,
        change: PendingPlanChange,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE companies SET pending_change_plan = $2, \
                 pending_change_effective_at = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(company_id)
        .bind(change.next_plan.as_str())
        .bind(change.effective_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_pending_change(&self, company_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            "UPDATE companies SET pending_change_plan = NULL, \
                 pending_change_effective_at = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(company_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_pending_addon_removal(
        &self,
        company_id: Uuid,
        removal: PendingAddonRemoval,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE companies SET pending_removal_addon = $2, \
                 pending_removal_next_quantity = $3, pending_removal_effective_at = $4, \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(company_id)
        .bind(removal.addon_type.as_str())
        .bind(removal.next_quantity)
        .bind(removal.effective_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_pending_addon_removal(&self, company_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            "UPDATE companies SET pending_removal_addon = NULL, \
                 pending_removal_next_quantity = NULL, pending_removal_effective_at = NULL, \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(company_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PlanCatalog for PgStore {
    async fn find_by_gateway_plan_id(
        &self,
        gateway_plan_id: &str,
    ) -> BillingResult<Option<PlanCatalogEntry>> {
        let row: Option<(String, String, i32, i32)> = sqlx::query_as(
            "SELECT plan_id, gateway_plan_id, user_limit, connection_limit \
             FROM plan_catalog WHERE gateway_plan_id = $1",
        )
        .bind(gateway_plan_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(catalog_entry_from_row).transpose()
    }
}

fn catalog_entry_from_row(
    (plan_id, gateway_plan_id, user_limit, connection_limit): (String, String, i32, i32),
) -> BillingResult<PlanCatalogEntry> {
    Ok(PlanCatalogEntry {
        plan_id: PlanTier::from_str(&plan_id).ok_or_else(|| {
            BillingError::Database(format!("plan catalog has unknown plan '{plan_id}'"))
        })?,
        gateway_plan_id,
        user_limit,
        connection_limit,
    })
}

#[async_trait]
impl AuditLog for PgStore {
    async fn append(&self, record: &BillingAuditRecord) -> BillingResult<()> {
        sqlx::query(
            "INSERT INTO billing_audit_log \
                 (company_id, subscription_id, event_kind, payment_status, \
                  total_monthly_cost_cents) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.company_id)
        .bind(&record.subscription_id)
        .bind(&record.event_kind)
        .bind(record.payment_status.as_str())
        .bind(record.total_monthly_cost_cents)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WebhookJournal for PgStore {
    async fn record(
        &self,
        event_kind: &str,
        subscription_id: Option<&str>,
        outcome: &str,
        error: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            "INSERT INTO gateway_webhook_events \
                 (event_kind, subscription_id, outcome, error_message) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(event_kind)
        .bind(subscription_id)
        .bind(outcome)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
