//! Service wiring.

use std::sync::Arc;

use anyhow::{Context, Result};
use pricekeep_client::{ApiClient, ApiConfig, ScrapeClient, ScrapeConfig};
use pricekeep_core::{
    AppConfig, PriceApi, PriceScraper, PriceService, PriceStore, Resolver, TieredCache, Unconfigured,
};

/// Open the store, build both upstream clients and the cache, and assemble
/// the service.
///
/// A source whose settings are missing is replaced by one that always fails,
/// so the resolver still falls through to the remaining tiers.
pub async fn build(config: &AppConfig) -> Result<Arc<PriceService>> {
    let store = PriceStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening price store at {}", config.db_path.display()))?;

    let resolver = Resolver::new(store.clone(), api_source(config)?, scrape_source(config)?, config.resolver_config());
    let cache = TieredCache::connect(&config.tier_config(), &store).await;
    if cache.is_degraded() {
        tracing::warn!(backend = config.secondary_backend.as_str(), "secondary cache unavailable, memory tier only");
    }

    Ok(Arc::new(PriceService::with_cache(Arc::new(resolver), Arc::new(cache))))
}

fn api_source(config: &AppConfig) -> Result<Arc<dyn PriceApi>> {
    match ApiConfig::from_app_config(config) {
        Ok(api) => Ok(Arc::new(ApiClient::new(api).context("building price API client")?)),
        Err(e) => {
            tracing::warn!(source = "structured_api", error = %e, "price API disabled");
            Ok(Arc::new(Unconfigured::new("structured_api")))
        }
    }
}

fn scrape_source(config: &AppConfig) -> Result<Arc<dyn PriceScraper>> {
    match ScrapeConfig::from_app_config(config) {
        Ok(scrape) => Ok(Arc::new(ScrapeClient::new(scrape).context("building scrape client")?)),
        Err(e) => {
            tracing::warn!(source = "scraper", error = %e, "scraper disabled");
            Ok(Arc::new(Unconfigured::new("scraper")))
        }
    }
}
