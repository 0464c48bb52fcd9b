//! Configuration loading from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use wallet_gateway::GatewayConfig;
use wallet_hex::EngineConfig;

/// Outgoing payment-event webhook.
pub struct WebhookConfig {
    pub url: String,
    pub secret: String,
}

/// Application configuration.
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub gateway: GatewayConfig,
    /// Shared secret for `/api/gateway/callback`; callbacks are refused without it.
    pub callback_secret: Option<String>,
    pub webhook: Option<WebhookConfig>,
    pub engine: EngineConfig,
    pub reconcile_interval: Duration,
    pub reconcile_batch_size: usize,
    pub rate_limit_per_minute: u32,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let port = parse_or("PORT", 3000)?;
        let database_url = optional("DATABASE_URL");

        let defaults = GatewayConfig::default();
        let gateway = GatewayConfig {
            base_url: optional("GATEWAY_BASE_URL").unwrap_or(defaults.base_url),
            api_key: optional("GATEWAY_API_KEY").unwrap_or_default(),
            timeout: Duration::from_secs(parse_or("GATEWAY_TIMEOUT_SECS", 30)?),
            supports_idempotency_key: parse_or("GATEWAY_IDEMPOTENCY_KEYS", false)?,
            max_retries: parse_or("GATEWAY_MAX_RETRIES", defaults.max_retries)?,
            retry_base_delay: defaults.retry_base_delay,
        };

        let webhook = match (optional("NOTIFY_WEBHOOK_URL"), optional("NOTIFY_WEBHOOK_SECRET")) {
            (Some(url), Some(secret)) => Some(WebhookConfig { url, secret }),
            (Some(_), None) => {
                return Err(anyhow::anyhow!(
                    "NOTIFY_WEBHOOK_SECRET is required when NOTIFY_WEBHOOK_URL is set"
                ));
            }
            _ => None,
        };

        let engine = EngineConfig {
            max_vouchers_per_transaction: parse_or("MAX_VOUCHERS_PER_TRANSACTION", 2)?,
            inquiry_ttl: chrono::Duration::seconds(parse_or("INQUIRY_TTL_SECS", 900)?),
            order_ttl: chrono::Duration::seconds(parse_or("ORDER_TTL_SECS", 900)?),
        };

        Ok(Self {
            port,
            database_url,
            gateway,
            callback_secret: optional("GATEWAY_CALLBACK_SECRET"),
            webhook,
            engine,
            reconcile_interval: Duration::from_secs(parse_or("RECONCILE_INTERVAL_SECS", 30)?),
            reconcile_batch_size: parse_or("RECONCILE_BATCH_SIZE", 50)?,
            rate_limit_per_minute: parse_or("RATE_LIMIT_PER_MINUTE", 100)?,
        })
    }
}

/// Unset and blank variables both read as `None`.
fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {} {:?}: {}", name, raw, e)),
        None => Ok(default),
    }
}
