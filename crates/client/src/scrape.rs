//! Scrape service client.
//!
//! HTML scraping runs in a separate service; this client only asks it for a
//! product's price with `GET {base_url}/scrape/{product_id}` and reads back
//! `{"price": <int>}`. Pages may need rendering, so the default timeout is
//! much longer than the API's.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pricekeep_core::{AppConfig, ConfigError, PriceScraper, SourceError};
use reqwest::header;
use url::Url;

use crate::ApiError;
use crate::endpoint::{join_segments, parse_base};
use crate::limiter::RateLimiter;
use crate::response::read_price;

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub min_interval: Duration,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(30),
            user_agent: "pricekeep/0.1".to_string(),
            min_interval: Duration::from_secs(1),
        }
    }
}

impl ScrapeConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the scrape service URL is not set.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: config.require_scraper_base_url()?.to_string(),
            timeout: config.scraper_timeout(),
            user_agent: config.user_agent.clone(),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeClient {
    http: reqwest::Client,
    base: Url,
    config: ScrapeConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl ScrapeClient {
    pub fn new(config: ScrapeConfig) -> Result<Self, ApiError> {
        let base = parse_base(&config.base_url)?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Network(Arc::new(e)))?;

        let rate_limiter = Arc::new(RateLimiter::new(config.min_interval));
        Ok(Self { http, base, config, rate_limiter })
    }

    /// Ask the scrape service for a product's price.
    pub async fn price(&self, product_id: &str) -> Result<i64, ApiError> {
        let product_id = product_id.trim();
        if product_id.is_empty() {
            return Err(ApiError::InvalidProductId(product_id.to_string()));
        }

        self.rate_limiter.acquire().await;

        let url = join_segments(&self.base, &["scrape", product_id]);
        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, &self.config.user_agent)
            .send()
            .await?;

        Ok(read_price(response).await?.price)
    }
}

#[async_trait]
impl PriceScraper for ScrapeClient {
    async fn scrape_price(&self, product_id: &str) -> Result<i64, SourceError> {
        self.price(product_id).await.map_err(SourceError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_app_config() {
        let app = AppConfig { scraper_base_url: Some("http://scraper:9000".into()), ..Default::default() };
        let config = ScrapeConfig::from_app_config(&app).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(ScrapeClient::new(config).is_ok());
    }

    #[test]
    fn test_config_requires_base_url() {
        assert!(ScrapeConfig::from_app_config(&AppConfig::default()).is_err());
    }
}
