//! Fallback resolver.
//!
//! Resolves a product id to a price by walking a fixed trust order:
//!
//! 1. fresh persistent record (no upstream call)
//! 2. structured API
//! 3. scraper
//! 4. stale persistent record, however old
//! 5. `Unresolvable`
//!
//! Prices obtained from steps 2 and 3 are written through to the store.
//! Soft upstream failures are logged and never leave this module. Concurrent
//! resolutions of the same product share one execution of the chain.

pub mod flight;

pub use flight::SingleFlight;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::product::validate_product_id;
use crate::store::{PriceRecord, PriceSource, PriceStore};
use crate::upstream::{PriceApi, PriceScraper};
use crate::{ResolveError, SourceError};

/// Resolver tuning.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How long a stored record is trusted without refetching.
    pub freshness_window: Duration,
    /// Budget for one structured API call.
    pub api_timeout: Duration,
    /// Budget for one scraper call.
    pub scraper_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(24 * 3600),
            api_timeout: Duration::from_secs(5),
            scraper_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub product_id: String,
    pub price: i64,
    /// Where the price came from. For a fast-path hit this is the
    /// provenance of the stored record.
    pub source: PriceSource,
    pub fetched_at: DateTime<Utc>,
}

impl From<PriceRecord> for Resolution {
    fn from(record: PriceRecord) -> Self {
        Self {
            product_id: record.product_id,
            price: record.price,
            source: record.source,
            fetched_at: record.fetched_at,
        }
    }
}

/// Price resolver over the persistent store and the two upstream sources.
pub struct Resolver {
    store: PriceStore,
    api: Arc<dyn PriceApi>,
    scraper: Arc<dyn PriceScraper>,
    config: ResolverConfig,
    flights: SingleFlight<Result<Resolution, ResolveError>>,
}

impl Resolver {
    pub fn new(
        store: PriceStore, api: Arc<dyn PriceApi>, scraper: Arc<dyn PriceScraper>, config: ResolverConfig,
    ) -> Self {
        Self { store, api, scraper, config, flights: SingleFlight::new() }
    }

    /// Resolve a product id to its current price in currency subunits.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::Unresolvable` only when every source failed and
    /// no record exists at all (or the id itself is invalid).
    pub async fn resolve(&self, product_id: &str) -> Result<i64, ResolveError> {
        self.resolve_detailed(product_id).await.map(|r| r.price)
    }

    /// Like [`Resolver::resolve`] but also reports provenance and fetch time.
    ///
    /// # Errors
    ///
    /// See [`Resolver::resolve`].
    pub async fn resolve_detailed(&self, product_id: &str) -> Result<Resolution, ResolveError> {
        let id = match validate_product_id(product_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(product_id, error = %e, "rejecting product id");
                return Err(ResolveError::unresolvable(product_id.trim()));
            }
        };

        self.flights.run(id, || self.run_chain(id)).await
    }

    pub fn store(&self) -> &PriceStore {
        &self.store
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Number of products with a resolution currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    async fn run_chain(&self, product_id: &str) -> Result<Resolution, ResolveError> {
        let existing = self.load_record(product_id).await;

        if let Some(record) = &existing
            && record.is_fresh(self.config.freshness_window, Utc::now())
        {
            tracing::debug!(product_id, source = %record.source, "fresh record, skipping upstream");
            return Ok(record.clone().into());
        }

        let api = self.call_source(
            product_id,
            PriceSource::StructuredApi,
            self.config.api_timeout,
            self.api.fetch_price(product_id),
        );
        match api.await {
            Ok(price) => return Ok(self.write_through(product_id, price, PriceSource::StructuredApi).await),
            Err(e @ SourceError::QuotaExceeded) => {
                tracing::warn!(product_id, source = "structured_api", error = %e, "quota exceeded, falling back to scraper");
            }
            Err(e) => {
                tracing::warn!(product_id, source = "structured_api", error = %e, "fetch failed, falling back to scraper");
            }
        }

        let scraped = self.call_source(
            product_id,
            PriceSource::Scraper,
            self.config.scraper_timeout,
            self.scraper.scrape_price(product_id),
        );
        match scraped.await {
            Ok(price) => return Ok(self.write_through(product_id, price, PriceSource::Scraper).await),
            Err(e) => {
                tracing::warn!(product_id, source = "scraper", error = %e, "scrape failed");
            }
        }

        match existing {
            Some(record) => {
                tracing::warn!(
                    product_id,
                    price = record.price,
                    fetched_at = %record.fetched_at,
                    "all sources failed, serving stale price"
                );
                Ok(Resolution {
                    product_id: record.product_id,
                    price: record.price,
                    source: PriceSource::StaleFallback,
                    fetched_at: record.fetched_at,
                })
            }
            None => {
                tracing::error!(product_id, "all sources failed and no stored price exists");
                Err(ResolveError::unresolvable(product_id))
            }
        }
    }

    /// Store read failures are treated as "no record".
    async fn load_record(&self, product_id: &str) -> Option<PriceRecord> {
        match self.store.get_price_record(product_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(product_id, source = "store", error = %e, "failed to read price record");
                None
            }
        }
    }

    async fn call_source<F>(
        &self, product_id: &str, source: PriceSource, budget: Duration, call: F,
    ) -> Result<i64, SourceError>
    where
        F: Future<Output = Result<i64, SourceError>>,
    {
        let price = match tokio::time::timeout(budget, call).await {
            Ok(result) => result?,
            Err(_) => return Err(SourceError::upstream(format!("timed out after {}ms", budget.as_millis()))),
        };

        if price <= 0 {
            return Err(SourceError::upstream(format!("non-positive price {price}")));
        }

        tracing::info!(product_id, %source, price, "fetched price");
        Ok(price)
    }

    /// Persist a freshly fetched price. A failed write still returns the price.
    async fn write_through(&self, product_id: &str, price: i64, source: PriceSource) -> Resolution {
        let record = PriceRecord::new(product_id, price, source);

        match self.store.upsert_price_record(&record).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(product_id, "a newer record is already stored; keeping it"),
            Err(e) => tracing::warn!(product_id, source = "store", error = %e, "failed to persist price"),
        }

        record.into()
    }
}
