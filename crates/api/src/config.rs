//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `BAZAAR_HOST` - bind address (default: 0.0.0.0)
//! - `BAZAAR_PORT` - listen port (default: 8080)
//! - `JWT_SECRET` - HS256 signing secret (default: an insecure dev secret, with a warning)
//! - `BAZAAR_CURRENCY` - payment intent currency (default: KES)
//! - `BAZAAR_REVALIDATE_PRICES_ON_CHECKOUT` - re-check cart prices at checkout (default: false)
//! - `BAZAAR_CATALOG_SEED` - JSON product list loaded at startup
//! - `BAZAAR_RECONCILE_INTERVAL_SECS` - checkout reconciler period (default: 30)
//! - `BAZAAR_LOG_FORMAT` - `json` or `pretty` (default: json)
//! - `DATABASE_URL` - Postgres connection string (only with the `postgres` feature)

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use bazaar_infra::CheckoutSettings;
use bazaar_observability::LogFormat;
use bazaar_orders::Currency;

const DEV_JWT_SECRET: &str = "bazaar-dev-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    pub jwt_secret: SecretString,
    pub checkout: CheckoutSettings,
    pub catalog_seed: Option<PathBuf>,
    pub reconcile_interval: Duration,
    pub log_format: LogFormat,
    /// Postgres URL (contains password).
    pub database_url: Option<SecretString>,
}

impl AppConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = parse_or(&get, "BAZAAR_HOST", IpAddr::from([0, 0, 0, 0]))?;
        let port = parse_or(&get, "BAZAAR_PORT", 8080u16)?;

        let jwt_secret =
            SecretString::from(get("JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.to_string()));

        let currency = match get("BAZAAR_CURRENCY") {
            Some(code) => Currency::new(&code).map_err(|e| invalid("BAZAAR_CURRENCY", e))?,
            None => Currency::default(),
        };
        let revalidate_prices = match get("BAZAAR_REVALIDATE_PRICES_ON_CHECKOUT") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                invalid("BAZAAR_REVALIDATE_PRICES_ON_CHECKOUT", "expected true or false")
            })?,
            None => false,
        };

        let interval_secs = parse_or(&get, "BAZAAR_RECONCILE_INTERVAL_SECS", 30u64)?;
        if interval_secs == 0 {
            return Err(invalid("BAZAAR_RECONCILE_INTERVAL_SECS", "must be at least 1"));
        }

        let log_format = parse_or(&get, "BAZAAR_LOG_FORMAT", LogFormat::default())?;

        Ok(Self {
            host,
            port,
            jwt_secret,
            checkout: CheckoutSettings {
                currency,
                revalidate_prices,
            },
            catalog_seed: get("BAZAAR_CATALOG_SEED").map(PathBuf::from),
            reconcile_interval: Duration::from_secs(interval_secs),
            log_format,
            database_url: get("DATABASE_URL").map(SecretString::from),
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether `JWT_SECRET` was left unset.
    pub fn uses_dev_jwt_secret(&self) -> bool {
        self.jwt_secret.expose_secret() == DEV_JWT_SECRET
    }

    /// The database URL, required when running against Postgres.
    pub fn require_database_url(&self) -> Result<&SecretString, ConfigError> {
        self.database_url
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))
    }
}

fn invalid(key: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidEnvVar(key.to_string(), reason.to_string())
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: ToString,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| invalid(key, e)),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:8080");
        assert!(config.uses_dev_jwt_secret());
        assert_eq!(config.checkout.currency.as_str(), "KES");
        assert!(!config.checkout.revalidate_prices);
        assert_eq!(config.reconcile_interval, Duration::from_secs(30));
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.catalog_seed.is_none());
        assert!(config.require_database_url().is_err());
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("BAZAAR_HOST", "127.0.0.1"),
            ("BAZAAR_PORT", "3000"),
            ("JWT_SECRET", "s3cr3t"),
            ("BAZAAR_CURRENCY", "usd"),
            ("BAZAAR_REVALIDATE_PRICES_ON_CHECKOUT", "TRUE"),
            ("BAZAAR_CATALOG_SEED", "catalog.json"),
            ("BAZAAR_RECONCILE_INTERVAL_SECS", "5"),
            ("BAZAAR_LOG_FORMAT", "pretty"),
            ("DATABASE_URL", "postgres://localhost/bazaar"),
        ])
        .unwrap();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3000");
        assert_eq!(config.jwt_secret.expose_secret(), "s3cr3t");
        assert!(!config.uses_dev_jwt_secret());
        assert_eq!(config.checkout.currency.as_str(), "USD");
        assert!(config.checkout.revalidate_prices);
        assert_eq!(config.catalog_seed, Some(PathBuf::from("catalog.json")));
        assert_eq!(config.reconcile_interval, Duration::from_secs(5));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(
            config.require_database_url().unwrap().expose_secret(),
            "postgres://localhost/bazaar"
        );
    }

    #[test]
    fn invalid_values_name_the_variable() {
        for (key, value) in [
            ("BAZAAR_PORT", "eighty"),
            ("BAZAAR_HOST", "localhost:80"),
            ("BAZAAR_CURRENCY", "shilling"),
            ("BAZAAR_REVALIDATE_PRICES_ON_CHECKOUT", "maybe"),
            ("BAZAAR_RECONCILE_INTERVAL_SECS", "0"),
            ("BAZAAR_LOG_FORMAT", "xml"),
        ] {
            match load(&[(key, value)]) {
                Err(ConfigError::InvalidEnvVar(k, _)) => assert_eq!(k, key),
                other => panic!("{key}={value}: expected InvalidEnvVar, got {other:?}"),
            }
        }
    }
}
