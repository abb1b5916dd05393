//! Application state

use std::sync::Arc;

use sqlx::PgPool;
use yogvaidya_billing::{BillingService, CacheService, GatewayConfig};

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub async fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let gateway_config = GatewayConfig::from_env()?;
        let cache = match &config.redis_url {
            Some(url) => CacheService::redis(url).await,
            None => {
                tracing::warn!("REDIS_URL not set, caching disabled");
                CacheService::disabled()
            }
        };
        let billing = BillingService::new(gateway_config, cache, pool.clone());
        Ok(Self {
            pool,
            config,
            billing: Arc::new(billing),
        })
    }
}
