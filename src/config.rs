//! Environment configuration

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::workers::{OutboxSettings, SweeperSettings};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct MailRelay {
    pub url: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub nats_url: Option<String>,
    pub mail_relay: Option<MailRelay>,
    pub sweeper: SweeperSettings,
    pub outbox: OutboxSettings,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    pub json_logs: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let mail_relay = match (get("MAIL_RELAY_URL"), get("MAIL_FROM")) {
            (Some(url), Some(from)) => Some(MailRelay { url, from }),
            (Some(_), None) => return Err(ConfigError::Missing("MAIL_FROM")),
            _ => None,
        };
        let delivery_timeout = Duration::from_secs(parse(&get, "DELIVERY_TIMEOUT_SECS", 10)?);

        Ok(Self {
            port: parse(&get, "PORT", 8083)?,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            jwt_secret,
            jwt_issuer: get("JWT_ISSUER"),
            jwt_audience: get("JWT_AUDIENCE"),
            nats_url: get("NATS_URL"),
            mail_relay,
            sweeper: SweeperSettings {
                interval: Duration::from_secs(parse(&get, "SALE_SWEEP_INTERVAL_SECS", 3600)?),
                retry_backoff: Duration::from_secs(parse(&get, "SALE_SWEEP_RETRY_SECS", 30)?),
                batch: parse(&get, "SALE_SWEEP_BATCH", 100)?,
            },
            outbox: OutboxSettings {
                poll_interval: Duration::from_secs(parse(&get, "OUTBOX_POLL_SECS", 15)?),
                batch: parse(&get, "OUTBOX_BATCH", 50)?,
                max_attempts: parse(&get, "OUTBOX_MAX_ATTEMPTS", 10)?,
                delivery_timeout,
                grace: delivery_timeout * 3,
                claim_lease: Duration::from_secs(parse(&get, "OUTBOX_CLAIM_LEASE_SECS", 600)?),
                retention: Duration::from_secs(parse::<u64>(&get, "OUTBOX_RETENTION_HOURS", 168)? * 3600),
            },
            cors_origins: get("CORS_ORIGINS")
                .map(|v| v.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect())
                .unwrap_or_default(),
            json_logs: get("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[("JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.port, 8083);
        assert!(config.database_url.is_none());
        assert_eq!(config.sweeper.interval, Duration::from_secs(3600));
        assert_eq!(config.sweeper.batch, 100);
        assert_eq!(config.outbox.max_attempts, 10);
        assert_eq!(config.outbox.grace, Duration::from_secs(30));
        assert_eq!(config.outbox.claim_lease, Duration::from_secs(600));
        assert_eq!(config.outbox.retention, Duration::from_secs(7 * 24 * 3600));
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn secret_is_required() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::Missing("JWT_SECRET"));
    }

    #[test]
    fn bad_numbers_are_errors() {
        let err = config(&[("JWT_SECRET", "s"), ("SALE_SWEEP_BATCH", "lots")]).unwrap_err();
        assert_eq!(err, ConfigError::Invalid { key: "SALE_SWEEP_BATCH", value: "lots".into() });
    }

    #[test]
    fn mail_relay_needs_sender() {
        let err = config(&[("JWT_SECRET", "s"), ("MAIL_RELAY_URL", "http://relay")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("MAIL_FROM"));
    }

    #[test]
    fn cors_origins_are_split() {
        let config = config(&[("JWT_SECRET", "s"), ("CORS_ORIGINS", "http://a.test, http://b.test,")]).unwrap();
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
    }
}
