#![cfg_attr(test, allow(clippy::unwrap_used))]

//! YogVaidya shared types
//!
//! Domain enums used by both the billing crate and the API server,
//! plus the Postgres pool constructor.

pub mod db;
pub mod types;

pub use db::create_pool;
pub use types::{BillingPeriod, SubscriptionPlan, SubscriptionStatus};
