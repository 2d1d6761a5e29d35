//! Configuration module for sync-service.

use crate::provider::plaid::{base_url_for_env, PlaidConfig};
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SyncServiceConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// `None` runs against the in-process store.
    pub database: Option<DatabaseConfig>,
    pub plaid: PlaidConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Credential passes allowed to run at once across the whole process.
    pub max_concurrent_credentials: usize,
    /// Lifetime of a credential's sync lease; a pass that dies without
    /// releasing it blocks that credential for at most this long.
    pub lease_ttl: Duration,
}

impl SyncServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_vars(common, |key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_vars<F>(common: core_config::Config, var: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &str, default: u64| -> Result<u64, AppError> {
            parse_or(var(key), default).map_err(|raw| {
                AppError::ConfigError(anyhow::anyhow!("{} must be a number, got {:?}", key, raw))
            })
        };
        let parsed_u32 = |key: &str, default: u32| -> Result<u32, AppError> {
            let value = parsed(key, u64::from(default))?;
            u32::try_from(value).map_err(|_| {
                AppError::ConfigError(anyhow::anyhow!(
                    "{} must be at most {}, got {}",
                    key,
                    u32::MAX,
                    value
                ))
            })
        };

        let database = match var("DATABASE_URL").filter(|url| !url.trim().is_empty()) {
            Some(url) => Some(DatabaseConfig {
                url: Secret::new(url),
                max_connections: parsed_u32("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parsed_u32("DATABASE_MIN_CONNECTIONS", 2)?,
            }),
            None => None,
        };

        let plaid_env = var("PLAID_ENV").unwrap_or_else(|| "sandbox".to_string());
        let defaults = PlaidConfig::default();
        let plaid = PlaidConfig {
            client_id: var("PLAID_CLIENT_ID").unwrap_or_default(),
            secret: Secret::new(var("PLAID_SECRET").unwrap_or_default()),
            base_url: var("PLAID_BASE_URL")
                .unwrap_or_else(|| base_url_for_env(&plaid_env).to_string()),
            client_name: var("PLAID_CLIENT_NAME").unwrap_or(defaults.client_name),
            products: var("PLAID_PRODUCTS")
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.products),
            country_codes: var("PLAID_COUNTRY_CODES")
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.country_codes),
            language: var("PLAID_LANGUAGE").unwrap_or(defaults.language),
            days_requested: parsed_u32("PLAID_DAYS_REQUESTED", 730)?,
            page_size: parsed_u32("PLAID_PAGE_SIZE", 500)?,
            request_timeout: Duration::from_secs(parsed("PLAID_REQUEST_TIMEOUT_SECS", 30)?),
            connect_timeout: Duration::from_secs(parsed("PLAID_CONNECT_TIMEOUT_SECS", 5)?),
        };

        Ok(Self {
            common,
            service_name: var("SERVICE_NAME").unwrap_or_else(|| "sync-service".to_string()),
            service_version: var("SERVICE_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            otlp_endpoint: var("OTLP_ENDPOINT"),
            database,
            plaid,
            sync: SyncConfig {
                max_concurrent_credentials: usize::try_from(
                    parsed("SYNC_MAX_CONCURRENT_CREDENTIALS", 4)?.max(1),
                )
                .unwrap_or(usize::MAX),
                lease_ttl: Duration::from_secs(parsed("SYNC_LEASE_TTL_SECS", 600)?.max(1)),
            },
        })
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> Result<T, String> {
    match raw {
        Some(value) => value.trim().parse().map_err(|_| value),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::plaid::PRODUCTION_URL;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<SyncServiceConfig, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncServiceConfig::from_vars(core_config::Config::default(), |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.service_name, "sync-service");
        assert!(config.database.is_none());
        assert_eq!(config.plaid.page_size, 500);
        assert_eq!(config.plaid.days_requested, 730);
        assert_eq!(config.plaid.request_timeout, Duration::from_secs(30));
        assert_eq!(config.sync.max_concurrent_credentials, 4);
        assert_eq!(config.sync.lease_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/sync"),
            ("DATABASE_MAX_CONNECTIONS", "20"),
            ("PLAID_ENV", "production"),
            ("PLAID_SECRET", "shh"),
            ("PLAID_COUNTRY_CODES", "US, CA"),
            ("SYNC_MAX_CONCURRENT_CREDENTIALS", "0"),
            ("SYNC_LEASE_TTL_SECS", "90"),
        ])
        .unwrap();

        let database = config.database.unwrap();
        assert_eq!(database.max_connections, 20);
        assert_eq!(database.min_connections, 2);
        assert_eq!(config.plaid.base_url, PRODUCTION_URL);
        assert_eq!(config.plaid.secret.expose_secret(), "shh");
        assert_eq!(config.plaid.country_codes, vec!["US", "CA"]);
        assert_eq!(config.sync.max_concurrent_credentials, 1);
        assert_eq!(config.sync.lease_ttl, Duration::from_secs(90));
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = load(&[("PLAID_PAGE_SIZE", "lots")]).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn test_out_of_range_number_is_config_error() {
        let err = load(&[("PLAID_PAGE_SIZE", "4294967296")]).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));

        let err = load(&[
            ("DATABASE_URL", "postgres://localhost/sync"),
            ("DATABASE_MAX_CONNECTIONS", "99999999999"),
        ])
        .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));

        let config = load(&[("PLAID_PAGE_SIZE", "4294967295")]).unwrap();
        assert_eq!(config.plaid.page_size, u32::MAX);
    }
}
