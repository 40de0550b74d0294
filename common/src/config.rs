//! Service configuration.
//!
//! Values come from environment variables; an optional `.env` file in the
//! working directory is loaded first and never overrides variables that are
//! already set.

use std::time::Duration;

/// Runtime configuration for a service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Name of the service using this configuration.
    pub service_name: String,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Metadata database URL (MySQL). `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Base64 encoded 32-byte key for data source credentials.
    pub credential_key: Option<String>,
    /// Timeout for establishing a connection to an external engine.
    pub connect_timeout_secs: u64,
    /// An active transaction idle for longer than this is rolled back.
    pub tx_idle_timeout_secs: u64,
    /// How often the idle sweep runs.
    pub tx_sweep_interval_secs: u64,
    /// Lifetime of a materialized query result.
    pub result_ttl_secs: u64,
    /// Webhook receiving approval notifications.
    pub notify_webhook_url: Option<String>,
    /// Redis used for stats cache invalidation.
    pub redis_url: Option<String>,
    /// Cache keys dropped whenever query or approval stats change.
    pub stats_cache_keys: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "query-service".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8082,
            database_url: None,
            credential_key: None,
            connect_timeout_secs: 10,
            tx_idle_timeout_secs: 300,
            tx_sweep_interval_secs: 30,
            result_ttl_secs: 86_400,
            notify_webhook_url: None,
            redis_url: None,
            stats_cache_keys: vec!["dashboard:stats".to_string()],
        }
    }
}

impl AppConfig {
    /// Loads configuration from the environment for the named service.
    pub fn load_with_service(service_name: &str) -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "failed to read .env file");
            }
        }

        let defaults = Self::default();
        Self {
            service_name: service_name.to_string(),
            host: env_string("SERVER_HOST").unwrap_or(defaults.host),
            port: env_parse("SERVER_PORT", defaults.port),
            database_url: env_string("DATABASE_URL"),
            credential_key: env_string("CREDENTIAL_KEY"),
            connect_timeout_secs: env_parse("CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            tx_idle_timeout_secs: env_parse("TX_IDLE_TIMEOUT_SECS", defaults.tx_idle_timeout_secs),
            tx_sweep_interval_secs: env_parse(
                "TX_SWEEP_INTERVAL_SECS",
                defaults.tx_sweep_interval_secs,
            ),
            result_ttl_secs: env_parse("RESULT_TTL_SECS", defaults.result_ttl_secs),
            notify_webhook_url: env_string("NOTIFY_WEBHOOK_URL"),
            redis_url: env_string("REDIS_URL"),
            stats_cache_keys: env_string("STATS_CACHE_KEYS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.stats_cache_keys),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn tx_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_idle_timeout_secs)
    }

    pub fn tx_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.tx_sweep_interval_secs.max(1))
    }

    pub fn result_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.result_ttl_secs as i64)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "invalid value, using default");
            default
        }),
        None => default,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_skips_blanks() {
        assert_eq!(
            split_list(" a:stats, ,b:stats,"),
            vec!["a:stats".to_string(), "b:stats".to_string()]
        );
    }

    #[test]
    fn test_sweep_interval_never_zero() {
        let config = AppConfig {
            tx_sweep_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.tx_sweep_interval(), Duration::from_secs(1));
    }
}
