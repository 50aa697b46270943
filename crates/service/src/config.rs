//! Service configuration loaded from environment variables.

use std::time::Duration;

use domain::{InventoryConfig, RetryPolicy};
use messaging::MessagingConfig;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: expected {expected}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address of the operational endpoints
///   (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json` (default `pretty`)
/// - `DATABASE_URL`: PostgreSQL event store; unset keeps events in memory
/// - `DEFAULT_WAREHOUSE`: warehouse serving every SKU (default `WH-01`)
/// - `RESERVATION_TTL_SECS`: lifetime of a soft hold; unset or `0` means
///   holds never expire
/// - `EXPIRY_SWEEP_INTERVAL_SECS`: expiry sweep period (default 30)
/// - `IDEMPOTENCY_ENABLED`, `MESSAGE_DEDUP_ENABLED`,
///   `COMPENSATE_PARTIAL_ORDERS`, `PRUNE_FULFILLED_ALLOCATIONS`: feature
///   switches (default `true`)
/// - `COMMAND_MAX_ATTEMPTS`: attempts per command on version conflicts
///   (default 5)
/// - `DELIVERY_MAX_ATTEMPTS`: attempts per inbound message on
///   infrastructure failures (default 3)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub default_warehouse: String,
    pub reservation_ttl: Option<Duration>,
    pub expiry_sweep_interval: Duration,
    pub idempotency_enabled: bool,
    pub message_dedup_enabled: bool,
    pub compensate_partial_orders: bool,
    pub prune_fulfilled_allocations: bool,
    pub command_max_attempts: u32,
    pub delivery_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            default_warehouse: "WH-01".to_string(),
            reservation_ttl: None,
            expiry_sweep_interval: Duration::from_secs(30),
            idempotency_enabled: true,
            message_dedup_enabled: true,
            compensate_partial_orders: true,
            prune_fulfilled_allocations: true,
            command_max_attempts: 5,
            delivery_max_attempts: 3,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from `lookup`, falling back to defaults for
    /// unset variables. Set but malformed values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let ttl_secs: u64 = parse(&var, "RESERVATION_TTL_SECS", 0)?;
        let sweep_secs: u64 = parse(
            &var,
            "EXPIRY_SWEEP_INTERVAL_SECS",
            defaults.expiry_sweep_interval.as_secs(),
        )?;

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse(&var, "PORT", defaults.port)?,
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match var("LOG_FORMAT") {
                None => defaults.log_format,
                Some(v) => parse_log_format(&v)?,
            },
            database_url: var("DATABASE_URL"),
            default_warehouse: var("DEFAULT_WAREHOUSE").unwrap_or(defaults.default_warehouse),
            reservation_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            expiry_sweep_interval: Duration::from_secs(sweep_secs.max(1)),
            idempotency_enabled: flag(&var, "IDEMPOTENCY_ENABLED", defaults.idempotency_enabled)?,
            message_dedup_enabled: flag(
                &var,
                "MESSAGE_DEDUP_ENABLED",
                defaults.message_dedup_enabled,
            )?,
            compensate_partial_orders: flag(
                &var,
                "COMPENSATE_PARTIAL_ORDERS",
                defaults.compensate_partial_orders,
            )?,
            prune_fulfilled_allocations: flag(
                &var,
                "PRUNE_FULFILLED_ALLOCATIONS",
                defaults.prune_fulfilled_allocations,
            )?,
            command_max_attempts: parse(&var, "COMMAND_MAX_ATTEMPTS", defaults.command_max_attempts)?
                .max(1),
            delivery_max_attempts: parse(
                &var,
                "DELIVERY_MAX_ATTEMPTS",
                defaults.delivery_max_attempts,
            )?
            .max(1),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn inventory_config(&self) -> InventoryConfig {
        InventoryConfig {
            reservation_ttl: self.reservation_ttl,
            idempotency_enabled: self.idempotency_enabled,
            command_retry: RetryPolicy::new(self.command_max_attempts),
        }
    }

    pub fn messaging_config(&self) -> MessagingConfig {
        MessagingConfig {
            dedup_enabled: self.message_dedup_enabled,
            compensate_partial_orders: self.compensate_partial_orders,
            prune_fulfilled_allocations: self.prune_fulfilled_allocations,
            delivery_retry: RetryPolicy::new(self.delivery_max_attempts),
        }
    }
}

fn parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
            expected: "a non-negative integer",
        }),
    }
}

fn flag(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                value,
                expected: "true or false",
            }),
        },
    }
}

fn parse_log_format(value: &str) -> Result<LogFormat, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "pretty" | "text" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        _ => Err(ConfigError::Invalid {
            name: "LOG_FORMAT",
            value: value.to_string(),
            expected: "pretty or json",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.default_warehouse, "WH-01");
        assert!(config.database_url.is_none());
        assert!(config.reservation_ttl.is_none());
        assert!(config.message_dedup_enabled);
        assert!(config.compensate_partial_orders);
        assert_eq!(config.delivery_max_attempts, 3);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("LOG_FORMAT", "json"),
            ("DEFAULT_WAREHOUSE", "WH-07"),
            ("RESERVATION_TTL_SECS", "900"),
            ("MESSAGE_DEDUP_ENABLED", "false"),
            ("COMPENSATE_PARTIAL_ORDERS", "0"),
            ("COMMAND_MAX_ATTEMPTS", "8"),
        ])
        .unwrap();

        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.reservation_ttl, Some(Duration::from_secs(900)));

        let inventory = config.inventory_config();
        assert_eq!(inventory.reservation_ttl, Some(Duration::from_secs(900)));
        assert_eq!(inventory.command_retry.max_attempts, 8);

        let messaging = config.messaging_config();
        assert!(!messaging.dedup_enabled);
        assert!(!messaging.compensate_partial_orders);
        assert!(messaging.prune_fulfilled_allocations);
    }

    #[test]
    fn test_zero_ttl_disables_expiry() {
        let config = load(&[("RESERVATION_TTL_SECS", "0")]).unwrap();
        assert!(config.reservation_ttl.is_none());
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let err = load(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        assert!(load(&[("IDEMPOTENCY_ENABLED", "maybe")]).is_err());
        assert!(load(&[("LOG_FORMAT", "xml")]).is_err());
    }
}
