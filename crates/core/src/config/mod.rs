//! Application configuration with layered loading.
//!
//! Configuration is loaded with figment from, lowest to highest priority:
//!
//! 1. Built-in defaults
//! 2. TOML config file (if PRICEKEEP_CONFIG_FILE set)
//! 3. Environment variables (PRICEKEEP_*)

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::resolver::ResolverConfig;
use crate::tiered::{SecondaryBackend, TierConfig};

mod validation;

pub use validation::ConfigError;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database holding price records.
    ///
    /// Set via PRICEKEEP_DB_PATH.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// How long a stored price is trusted without refetching.
    ///
    /// Set via PRICEKEEP_FRESHNESS_HOURS.
    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: u64,

    /// Base URL of the structured price API.
    ///
    /// Set via PRICEKEEP_API_BASE_URL.
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Key sent to the structured price API.
    ///
    /// Set via PRICEKEEP_API_KEY. Required only when the API adapter is built.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Structured API call budget in milliseconds.
    #[serde(default = "default_api_timeout_ms")]
    pub api_timeout_ms: u64,

    /// Base URL of the scrape service.
    ///
    /// Set via PRICEKEEP_SCRAPER_BASE_URL.
    #[serde(default)]
    pub scraper_base_url: Option<String>,

    /// Scraper call budget in milliseconds. Pages may need rendering, so
    /// this is much larger than the API budget.
    #[serde(default = "default_scraper_timeout_ms")]
    pub scraper_timeout_ms: u64,

    /// User-Agent string for upstream HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum number of entries in the in-process memory tier.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// Memory tier time-to-live in seconds.
    #[serde(default = "default_memory_ttl_secs")]
    pub memory_ttl_secs: u64,

    /// Which shared secondary tier to use.
    ///
    /// Set via PRICEKEEP_SECONDARY_BACKEND (`sqlite`, `redis` or `none`).
    #[serde(default)]
    pub secondary_backend: SecondaryBackend,

    /// Redis connection URL when `secondary_backend = "redis"`.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Secondary tier time-to-live in seconds.
    #[serde(default = "default_secondary_ttl_secs")]
    pub secondary_ttl_secs: u64,

    /// Interval between scheduled refresh passes, in seconds.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Product ids refreshed on every scheduler pass.
    ///
    /// Set via PRICEKEEP_TRACKED_PRODUCTS (comma-separated) or a TOML array.
    #[serde(default)]
    pub tracked_products: Vec<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./pricekeep.sqlite")
}

fn default_freshness_hours() -> u64 {
    24
}

fn default_api_timeout_ms() -> u64 {
    5_000
}

fn default_scraper_timeout_ms() -> u64 {
    30_000
}

fn default_user_agent() -> String {
    "pricekeep/0.1".into()
}

fn default_memory_capacity() -> usize {
    1_000
}

fn default_memory_ttl_secs() -> u64 {
    3_600
}

fn default_secondary_ttl_secs() -> u64 {
    86_400
}

fn default_refresh_interval_secs() -> u64 {
    3_600
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            freshness_hours: default_freshness_hours(),
            api_base_url: None,
            api_key: None,
            api_timeout_ms: default_api_timeout_ms(),
            scraper_base_url: None,
            scraper_timeout_ms: default_scraper_timeout_ms(),
            user_agent: default_user_agent(),
            memory_capacity: default_memory_capacity(),
            memory_ttl_secs: default_memory_ttl_secs(),
            secondary_backend: SecondaryBackend::default(),
            redis_url: None,
            secondary_ttl_secs: default_secondary_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            tracked_products: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("PRICEKEEP_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("PRICEKEEP_")
                .ignore(&["config_file", "tracked_products"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        if let Ok(list) = std::env::var("PRICEKEEP_TRACKED_PRODUCTS") {
            let ids: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            figment = figment.merge(Serialized::default("tracked_products", ids));
        }

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_hours * 3600)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn scraper_timeout(&self) -> Duration {
        Duration::from_millis(self.scraper_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Settings for the fallback resolver.
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            freshness_window: self.freshness_window(),
            api_timeout: self.api_timeout(),
            scraper_timeout: self.scraper_timeout(),
        }
    }

    /// Settings for the tiered cache.
    pub fn tier_config(&self) -> TierConfig {
        TierConfig {
            memory_capacity: self.memory_capacity,
            memory_ttl: Duration::from_secs(self.memory_ttl_secs),
            secondary_ttl: Duration::from_secs(self.secondary_ttl_secs),
            backend: self.secondary_backend,
            redis_url: self.redis_url.clone(),
        }
    }

    /// Check that the structured API key is available (deferred validation).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the key is not set.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "api_key".into(),
            hint: "Set PRICEKEEP_API_KEY environment variable".into(),
        })
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the API base URL is not set.
    pub fn require_api_base_url(&self) -> Result<&str, ConfigError> {
        self.api_base_url.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "api_base_url".into(),
            hint: "Set PRICEKEEP_API_BASE_URL environment variable".into(),
        })
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the scrape service URL is not set.
    pub fn require_scraper_base_url(&self) -> Result<&str, ConfigError> {
        self.scraper_base_url.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "scraper_base_url".into(),
            hint: "Set PRICEKEEP_SCRAPER_BASE_URL environment variable".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./pricekeep.sqlite"));
        assert_eq!(config.freshness_hours, 24);
        assert_eq!(config.api_timeout_ms, 5_000);
        assert_eq!(config.scraper_timeout_ms, 30_000);
        assert_eq!(config.memory_capacity, 1_000);
        assert_eq!(config.memory_ttl_secs, 3_600);
        assert_eq!(config.secondary_ttl_secs, 86_400);
        assert_eq!(config.secondary_backend, SecondaryBackend::Sqlite);
        assert!(config.tracked_products.is_empty());
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_derived_durations() {
        let config = AppConfig::default();
        assert_eq!(config.freshness_window(), Duration::from_secs(86_400));
        assert_eq!(config.api_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.scraper_timeout(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_resolver_and_tier_config() {
        let config = AppConfig { memory_capacity: 10, memory_ttl_secs: 60, ..Default::default() };

        let resolver = config.resolver_config();
        assert_eq!(resolver.freshness_window, Duration::from_secs(86_400));

        let tiers = config.tier_config();
        assert_eq!(tiers.memory_capacity, 10);
        assert_eq!(tiers.memory_ttl, Duration::from_secs(60));
        assert_eq!(tiers.secondary_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn test_require_api_key_missing() {
        let config = AppConfig::default();
        assert!(matches!(config.require_api_key(), Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_require_api_key_present() {
        let config = AppConfig { api_key: Some("test-key".into()), ..Default::default() };
        assert_eq!(config.require_api_key().unwrap(), "test-key");
    }

    #[test]
    fn test_require_base_urls() {
        let config = AppConfig {
            api_base_url: Some("https://api.example.com".into()),
            ..Default::default()
        };
        assert!(config.require_api_base_url().is_ok());
        assert!(matches!(config.require_scraper_base_url(), Err(ConfigError::Missing { field, .. }) if field == "scraper_base_url"));
    }

    #[test]
    fn test_toml_layer_overrides_defaults() {
        let figment = Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::string(
            r#"
            freshness_hours = 12
            secondary_backend = "none"
            tracked_products = ["B01", "B02"]
            "#,
        ));
        let config: AppConfig = figment.extract().unwrap();
        assert_eq!(config.freshness_hours, 12);
        assert_eq!(config.secondary_backend, SecondaryBackend::None);
        assert_eq!(config.tracked_products, vec!["B01".to_string(), "B02".to_string()]);
    }
}
