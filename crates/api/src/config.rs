//! API server configuration loaded from the environment.

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub redis_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL environment variable not set")?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let redis_url = std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty());

        Ok(Self {
            database_url,
            bind_address,
            redis_url,
        })
    }
}
