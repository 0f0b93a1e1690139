//! Structured price API client.
//!
//! ### Protocol
//!
//! - **Endpoint**: `GET {base_url}/products/{product_id}/price`
//! - **Authentication**: `X-Api-Key` header.
//! - **Response**: `{"price": <int>, ...}` in the smallest currency subunit.
//! - **Rate limiting**: a minimum interval between requests on the client
//!   side; a 429 from the server is reported as `QuotaExceeded` and never
//!   retried here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pricekeep_core::{AppConfig, ConfigError, PriceApi, SourceError};
use reqwest::header;
use url::Url;

use crate::ApiError;
use crate::endpoint::{join_segments, parse_base};
use crate::limiter::RateLimiter;
use crate::response::read_price;

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default user agent.
const DEFAULT_USER_AGENT: &str = "pricekeep/0.1";

/// Default minimum interval between requests.
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(250);

/// Price API client configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub min_interval: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

impl ApiConfig {
    /// Build from application configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the API key or base URL is not set.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: config.require_api_key()?.to_string(),
            base_url: config.require_api_base_url()?.to_string(),
            timeout: config.api_timeout(),
            user_agent: config.user_agent.clone(),
            ..Default::default()
        })
    }
}

/// Structured price API client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    config: ApiConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl ApiClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        if config.api_key.is_empty() {
            return Err(ApiError::MissingApiKey);
        }
        let base = parse_base(&config.base_url)?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Network(Arc::new(e)))?;

        let rate_limiter = Arc::new(RateLimiter::new(config.min_interval));
        Ok(Self { http, base, config, rate_limiter })
    }

    /// Fetch the current price of a product.
    pub async fn price(&self, product_id: &str) -> Result<i64, ApiError> {
        let product_id = product_id.trim();
        if product_id.is_empty() {
            return Err(ApiError::InvalidProductId(product_id.to_string()));
        }

        self.rate_limiter.acquire().await;

        let start = Instant::now();
        let url = join_segments(&self.base, &["products", product_id, "price"]);

        tracing::debug!(product_id, "requesting price from API");

        let response = self
            .http
            .get(url)
            .header("X-Api-Key", &self.config.api_key)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, &self.config.user_agent)
            .send()
            .await?;

        let body = read_price(response).await?;
        tracing::debug!(product_id, price = body.price, elapsed_ms = start.elapsed().as_millis() as u64, "API price received");
        Ok(body.price)
    }
}

#[async_trait]
impl PriceApi for ApiClient {
    async fn fetch_price(&self, product_id: &str) -> Result<i64, SourceError> {
        self.price(product_id).await.map_err(SourceError::from)
    }
}
