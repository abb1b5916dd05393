#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! YogVaidya Billing Module
//!
//! Handles Razorpay integration for subscriptions, billing history,
//! and payment webhooks.
//!
//! ## Features
//!
//! - **Subscription Management**: Trials, activation, cancel-at-cycle-end,
//!   upgrades with proration, lazy gateway reconciliation
//! - **Billing History**: Email-scoped payment history with strict
//!   validation against cross-user leakage
//! - **Caching**: TTL cache over Redis with fire-and-forget writes and
//!   pattern invalidation; degrades to direct fetches when Redis is down
//! - **Webhooks**: Razorpay event handling with HMAC verification
//! - **Invariants**: Runnable consistency checks over subscription rows

pub mod cache;
pub mod client;
pub mod error;
pub mod history;
pub mod invariants;
pub mod store;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_support;


// Cache
pub use cache::{cache_key, keys, ttl, CacheBackend, CacheService, MemoryBackend, RedisBackend};

// Client
pub use client::{
    GatewayConfig, GatewaySubscription, OrderHandle, PaymentGateway, PaymentRecord, PlanHandle,
    RazorpayClient,
};

// Error
pub use error::{BillingError, BillingResult};

// History
pub use history::{BillingHistoryService, BillingItem};

// Store
pub use store::{
    PgUserStore, SubscriptionPatch, SubscriptionRecord, SubscriptionSnapshot, UserRecord,
    UserStore,
};

// Subscriptions
pub use subscriptions::{
    has_feature_access, pricing, CreateSubscriptionRequest, SubscriptionAnalytics,
    SubscriptionService, SubscriptionView, UpgradeOrder, UpgradeQuote,
};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Webhooks
pub use webhooks::{WebhookHandler, WebhookOutcome};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub cache: CacheService,
    pub history: Arc<BillingHistoryService>,
    pub subscriptions: SubscriptionService,
    pub invariants: InvariantChecker,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables. Redis
    /// being unreachable disables caching but is not fatal.
    pub async fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = GatewayConfig::from_env()?;
        let cache = match std::env::var("REDIS_URL") {
            Ok(url) if !url.is_empty() => CacheService::redis(&url).await,
            _ => {
                tracing::warn!("REDIS_URL not set, caching disabled");
                CacheService::disabled()
            }
        };
        Ok(Self::new(config, cache, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: GatewayConfig, cache: CacheService, pool: PgPool) -> Self {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(RazorpayClient::new(config.clone()));
        let store: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool));
        Self::from_parts(Arc::new(config), gateway, store, cache)
    }

    /// Wire the services from already-built dependencies. This is the
    /// seam the tests use to substitute in-memory doubles.
    pub fn from_parts(
        config: Arc<GatewayConfig>,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn UserStore>,
        cache: CacheService,
    ) -> Self {
        let history = Arc::new(BillingHistoryService::new(gateway.clone(), cache.clone()));
        let subscriptions = SubscriptionService::new(store.clone(), gateway, config.clone());
        let invariants = InvariantChecker::new(store.clone());
        let webhooks = WebhookHandler::new(config.webhook_secret.clone(), store, history.clone());

        Self {
            cache,
            history,
            subscriptions,
            invariants,
            webhooks,
        }
    }
}
