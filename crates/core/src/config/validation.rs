//! Configuration validation rules.
//!
//! Applied to `AppConfig` after it has been loaded from environment, files,
//! or defaults.

use crate::config::AppConfig;
use crate::tiered::SecondaryBackend;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

fn check_timeout(field: &str, value_ms: u64) -> Result<(), ConfigError> {
    if value_ms < 100 {
        return Err(invalid(field, "must be at least 100ms"));
    }
    if value_ms > 300_000 {
        return Err(invalid(field, "must not exceed 5 minutes (300000ms)"));
    }
    Ok(())
}

/// Longest TTL accepted for either cache tier (30 days).
const MAX_TTL_SECS: u64 = 30 * 24 * 3600;

fn check_ttl(field: &str, value_secs: u64) -> Result<(), ConfigError> {
    if value_secs > MAX_TTL_SECS {
        return Err(invalid(field, "must not exceed 30 days (2592000s)"));
    }
    Ok(())
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `freshness_hours` is 0 or exceeds 30 days
    /// - either upstream timeout is below 100ms or above 5 minutes
    /// - `memory_capacity` is 0
    /// - either cache TTL exceeds 30 days
    /// - `user_agent` is empty
    /// - `refresh_interval_secs` is 0
    ///
    /// Returns `ConfigError::Missing` if the redis backend is selected without
    /// a `redis_url`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.freshness_hours == 0 {
            return Err(invalid("freshness_hours", "must be greater than 0"));
        }
        if self.freshness_hours > 720 {
            return Err(invalid("freshness_hours", "must not exceed 720 (30 days)"));
        }

        check_timeout("api_timeout_ms", self.api_timeout_ms)?;
        check_timeout("scraper_timeout_ms", self.scraper_timeout_ms)?;

        if self.memory_capacity == 0 {
            return Err(invalid("memory_capacity", "must be greater than 0"));
        }

        check_ttl("memory_ttl_secs", self.memory_ttl_secs)?;
        check_ttl("secondary_ttl_secs", self.secondary_ttl_secs)?;

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.refresh_interval_secs == 0 {
            return Err(invalid("refresh_interval_secs", "must be greater than 0"));
        }

        if self.secondary_backend == SecondaryBackend::Redis && self.redis_url.is_none() {
            return Err(ConfigError::Missing {
                field: "redis_url".into(),
                hint: "Set PRICEKEEP_REDIS_URL or choose another secondary_backend".into(),
            });
        }

        if self.memory_ttl_secs > self.secondary_ttl_secs {
            tracing::warn!(
                memory_ttl_secs = self.memory_ttl_secs,
                secondary_ttl_secs = self.secondary_ttl_secs,
                "memory tier TTL is longer than the secondary tier TTL"
            );
        }

        Ok(())
    }
}
