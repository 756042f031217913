#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared types and database helpers for ShelfShare services.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{PaymentStatus, PlanTier, UserRole};
