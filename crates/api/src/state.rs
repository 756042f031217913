//! Application state

use std::sync::Arc;

use shelfshare_billing::BillingService;
use sqlx::PgPool;

use crate::{auth::JwtManager, config::Config};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt: JwtManager,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, billing: Arc<BillingService>) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret);
        Self {
            pool,
            config,
            jwt,
            billing,
        }
    }
}
