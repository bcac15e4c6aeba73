//! ORM configuration loaded from the environment

use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::error::ModelError;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}

impl From<ConfigError> for ModelError {
    fn from(err: ConfigError) -> Self {
        ModelError::Configuration(err.to_string())
    }
}

/// Settings consumed by the query clients and the relationship engine
#[derive(Debug, Clone)]
pub struct OrmConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Prefix for generated self-join aliases (`<prefix>_<n>`)
    pub self_join_alias_prefix: String,
    /// How many relation names a preloader fetches at the same time
    pub preload_concurrency: usize,
    pub log_queries: bool,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            self_join_alias_prefix: "self_join".to_string(),
            preload_concurrency: 4,
            log_queries: true,
        }
    }
}

impl OrmConfig {
    /// Load configuration from `RELMAP_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = get_env_optional("RELMAP_DATABASE_URL");
        let max_connections = parse_env("RELMAP_MAX_CONNECTIONS", "10", "a positive integer")?;
        let acquire_timeout: u64 =
            parse_env("RELMAP_ACQUIRE_TIMEOUT_SECS", "30", "a number of seconds")?;
        let self_join_alias_prefix = get_env_or_default("RELMAP_SELF_JOIN_PREFIX", "self_join");
        let preload_concurrency =
            parse_env("RELMAP_PRELOAD_CONCURRENCY", "4", "a positive integer")?;
        let log_queries = parse_env("RELMAP_LOG_QUERIES", "true", "true or false")?;

        let config = OrmConfig {
            database_url,
            max_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout),
            self_join_alias_prefix,
            preload_concurrency,
            log_queries,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "max_connections".to_string(),
                reason: "Pool must allow at least one connection".to_string(),
            });
        }

        if self.preload_concurrency == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "preload_concurrency".to_string(),
                reason: "Preload concurrency cannot be 0".to_string(),
            });
        }

        let prefix = &self.self_join_alias_prefix;
        let valid_identifier = prefix
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
            && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_identifier {
            return Err(ConfigError::ValidationFailed {
                field: "self_join_alias_prefix".to_string(),
                reason: format!("'{}' is not a valid SQL identifier", prefix),
            });
        }

        Ok(())
    }
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(
    key: &str,
    default: &str,
    expected: &str,
) -> Result<T, ConfigError> {

    let raw = get_env_or_default(key, default);
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        field: key.to_string(),
        value: raw.clone(),
        expected: expected.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = OrmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.self_join_alias_prefix, "self_join");
        assert_eq!(config.preload_concurrency, 4);
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let config = OrmConfig {
            preload_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn test_rejects_alias_prefix_that_is_not_an_identifier() {
        let config = OrmConfig {
            self_join_alias_prefix: "1 bad".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_number_is_reported_with_field() {
        let err = parse_env::<u32>("RELMAP_TEST_UNSET_NUMBER", "abc", "a number").unwrap_err();
        assert!(err.to_string().contains("RELMAP_TEST_UNSET_NUMBER"));
    }
}
