use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config::Config as ObservabilityConfig;
use service_core::http::{HttpClientConfig, RetryPolicy};
use std::env;
use std::time::Duration;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub payments: PaymentsConfig,
    pub http: OutboundHttpConfig,
    /// Log filter and trace export, shared with other services.
    pub observability: ObservabilityConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RedisConfig {
    pub url: Secret<String>,
    /// Pub/sub channel carrying provider configuration changes.
    pub config_channel: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PaymentsConfig {
    /// Static fallback for the callback domain when the site setting is unset.
    pub site_domain: Option<String>,
    /// User ids allowed to trigger provider refreshes.
    pub operators: Vec<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct OutboundHttpConfig {
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl OutboundHttpConfig {
    pub fn client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            retry: RetryPolicy::with_retries(
                self.retries,
                Duration::from_millis(self.retry_delay_ms),
            ),
            user_agent: concat!("payment-orchestrator/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Comma-separated list; blanks are dropped.
fn user_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parsed<T>(name: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var_or(name, default)
        .parse()
        .with_context(|| format!("{} is not valid", name))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = var_or("PAYMENT_SERVICE_HOST", "0.0.0.0");
        let port = parsed("PAYMENT_SERVICE_PORT", "3003")?;

        let db_url = env::var("PAYMENT_DATABASE_URL").context("PAYMENT_DATABASE_URL must be set")?;
        let db_name = var_or("PAYMENT_DATABASE_NAME", "payment_db");

        let redis_url = var_or("PAYMENT_REDIS_URL", "redis://localhost:6379");
        let config_channel = var_or("PAYMENT_CONFIG_CHANNEL", "payment:config-changed");

        let site_domain = env::var("PAYMENT_SITE_DOMAIN")
            .ok()
            .filter(|d| !d.trim().is_empty());

        let operators = user_list(&var_or("PAYMENT_OPERATORS", ""));

        let http = OutboundHttpConfig {
            timeout_ms: parsed("PAYMENT_HTTP_TIMEOUT_MS", "30000")?,
            retries: parsed("PAYMENT_HTTP_RETRIES", "0")?,
            retry_delay_ms: parsed("PAYMENT_HTTP_RETRY_DELAY_MS", "1000")?,
        };

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            redis: RedisConfig {
                url: Secret::new(redis_url),
                config_channel,
            },
            payments: PaymentsConfig {
                site_domain,
                operators,
            },
            http,
            observability: ObservabilityConfig::load()
                .context("Failed to load observability settings")?,
            service_name: "payment-orchestrator".to_string(),
        })
    }
}
