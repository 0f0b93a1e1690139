//! Price service: the in-process entry point for bots, UIs and the scheduler.
//!
//! Wraps the resolver with an optional tiered cache. Constructed once at
//! startup and shared by reference; there is no global instance.

use std::sync::Arc;

use crate::ResolveError;
use crate::resolver::{Resolution, Resolver};
use crate::tiered::{CacheStats, CacheValue, TieredCache};

pub struct PriceService {
    resolver: Arc<Resolver>,
    cache: Option<Arc<TieredCache>>,
}

impl PriceService {
    /// Service without a cache: every call goes to the resolver.
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver, cache: None }
    }

    pub fn with_cache(resolver: Arc<Resolver>, cache: Arc<TieredCache>) -> Self {
        Self { resolver, cache: Some(cache) }
    }

    /// Current price of a product in currency subunits.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::Unresolvable` when no source produced a price
    /// and nothing was ever stored for the product.
    pub async fn get_price(&self, product_id: &str) -> Result<i64, ResolveError> {
        self.get_price_with(product_id, None).await.map(|v| v.price)
    }

    /// Cached view of a product for a resource set, resolving on a miss.
    ///
    /// # Errors
    ///
    /// See [`PriceService::get_price`].
    pub async fn get_price_with(
        &self, product_id: &str, resource_set: Option<&[&str]>,
    ) -> Result<CacheValue, ResolveError> {
        if let Some(cache) = &self.cache
            && let Some(value) = cache.get(product_id, resource_set).await
        {
            return Ok(value);
        }

        let resolution = self.resolver.resolve_detailed(product_id).await?;
        let value = CacheValue::from(&resolution);

        if let Some(cache) = &self.cache {
            cache.put(&resolution.product_id, resource_set, value.clone()).await;
        }
        Ok(value)
    }

    /// Drop every cached view of a product so the next read resolves again.
    ///
    /// The persistent record is untouched: it is still the fast path until
    /// it goes stale.
    pub async fn invalidate(&self, product_id: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(product_id).await;
        }
    }

    /// Resolve a product and bring the cache in line with the result.
    ///
    /// Every cached view is dropped unless the plain view already holds the
    /// resolved price. The check does not touch cache counters or recency.
    ///
    /// # Errors
    ///
    /// See [`PriceService::get_price`].
    pub async fn refresh(&self, product_id: &str) -> Result<Resolution, ResolveError> {
        let resolution = self.resolver.resolve_detailed(product_id).await?;

        if let Some(cache) = &self.cache {
            match cache.peek(&resolution.product_id, None).await {
                Some(cached) if cached.price == resolution.price => {}
                cached => {
                    if let Some(cached) = cached {
                        tracing::info!(
                            product_id = %resolution.product_id,
                            old_price = cached.price,
                            price = resolution.price,
                            "price changed, invalidating cached views"
                        );
                    }
                    cache.invalidate(&resolution.product_id).await;
                    cache.put(&resolution.product_id, None, CacheValue::from(&resolution)).await;
                }
            }
        }

        Ok(resolution)
    }

    /// Cache statistics, or `None` when running without a cache.
    pub fn stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn cache(&self) -> Option<&TieredCache> {
        self.cache.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{PriceRecord, PriceSource, PriceStore};
    use crate::tiered::TierConfig;
    use crate::upstream::{PriceApi, PriceScraper};
    use crate::{ResolverConfig, SourceError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    /// Upstream whose price can be changed between calls.
    struct Moving {
        price: AtomicI64,
        calls: AtomicUsize,
    }

    impl Moving {
        fn new(price: i64) -> Arc<Self> {
            Arc::new(Self { price: AtomicI64::new(price), calls: AtomicUsize::new(0) })
        }

        fn answer(&self) -> Result<i64, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.price.load(Ordering::SeqCst) {
                0 => Err(SourceError::upstream("unavailable")),
                p => Ok(p),
            }
        }
    }

    #[async_trait]
    impl PriceApi for Moving {
        async fn fetch_price(&self, _product_id: &str) -> Result<i64, SourceError> {
            self.answer()
        }
    }

    #[async_trait]
    impl PriceScraper for Moving {
        async fn scrape_price(&self, _product_id: &str) -> Result<i64, SourceError> {
            self.answer()
        }
    }

    async fn service(api: Arc<Moving>, cached: bool) -> PriceService {
        let store = PriceStore::open_in_memory().await.unwrap();
        let resolver = Arc::new(Resolver::new(store.clone(), api, Moving::new(0), ResolverConfig::default()));
        if cached {
            let cache = Arc::new(TieredCache::connect(&TierConfig::default(), &store).await);
            PriceService::with_cache(resolver, cache)
        } else {
            PriceService::new(resolver)
        }
    }

    /// Replace the stored record with a stale one so the next resolution goes upstream.
    async fn age_record(service: &PriceService, product_id: &str, price: i64) {
        let old = PriceRecord {
            product_id: product_id.into(),
            price,
            fetched_at: chrono::Utc::now() - chrono::Duration::days(2),
            source: PriceSource::StructuredApi,
        };
        service.resolver().store().delete_price_record(product_id).await.unwrap();
        service.resolver().store().upsert_price_record(&old).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_price_populates_cache() {
        let api = Moving::new(45_000);
        let service = service(api.clone(), true).await;

        assert_eq!(service.get_price("B0TEST123").await.unwrap(), 45_000);
        assert_eq!(service.get_price("B0TEST123").await.unwrap(), 45_000);

        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        let stats = service.stats().unwrap();
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.puts, 1);
    }

    #[tokio::test]
    async fn test_views_are_cached_independently() {
        let service = service(Moving::new(10), true).await;

        let offers = service.get_price_with("B01", Some(&["offers"])).await.unwrap();
        assert_eq!(offers.price, 10);
        assert_eq!(offers.source, PriceSource::StructuredApi);

        service.get_price("B01").await.unwrap();
        assert_eq!(service.cache().unwrap().memory().len(), 2);
    }

    #[tokio::test]
    async fn test_without_cache_uses_store_fast_path() {
        let api = Moving::new(10);
        let service = service(api.clone(), false).await;

        service.get_price("B01").await.unwrap();
        service.get_price("B01").await.unwrap();
        service.invalidate("B01").await;

        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(service.stats().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_forces_resolution_through_store() {
        let api = Moving::new(10);
        let service = service(api.clone(), true).await;

        service.get_price("B01").await.unwrap();
        service.invalidate("B01").await;
        assert_eq!(service.get_price("B01").await.unwrap(), 10);

        // The fresh stored record answers; no second upstream call.
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.stats().unwrap().misses, 2);
    }

    #[tokio::test]
    async fn test_refresh_replaces_changed_price() {
        let api = Moving::new(10);
        let service = service(api.clone(), true).await;

        service.get_price("B01").await.unwrap();
        service.get_price_with("B01", Some(&["offers"])).await.unwrap();

        age_record(&service, "B01", 10).await;
        api.price.store(12, Ordering::SeqCst);

        let resolution = service.refresh("B01").await.unwrap();
        assert_eq!(resolution.price, 12);

        assert_eq!(service.get_price("B01").await.unwrap(), 12);
        assert_eq!(service.get_price_with("B01", Some(&["offers"])).await.unwrap().price, 12);
    }

    #[tokio::test]
    async fn test_refresh_replaces_views_without_a_plain_entry() {
        let api = Moving::new(10);
        let service = service(api.clone(), true).await;

        service.get_price_with("B01", Some(&["offers"])).await.unwrap();
        age_record(&service, "B01", 10).await;
        api.price.store(12, Ordering::SeqCst);

        assert_eq!(service.refresh("B01").await.unwrap().price, 12);

        assert_eq!(service.get_price_with("B01", Some(&["offers"])).await.unwrap().price, 12);
        assert_eq!(service.stats().unwrap().invalidations, 1);
    }

    #[tokio::test]
    async fn test_refresh_does_not_count_as_a_cache_read() {
        let service = service(Moving::new(10), true).await;

        service.get_price("B01").await.unwrap();
        let before = service.stats().unwrap();
        service.refresh("B01").await.unwrap();
        let after = service.stats().unwrap();

        assert_eq!(after.memory_hits, before.memory_hits);
        assert_eq!(after.secondary_hits, before.secondary_hits);
        assert_eq!(after.misses, before.misses);
    }

    #[tokio::test]
    async fn test_refresh_keeps_matching_cache() {
        let service = service(Moving::new(10), true).await;

        service.get_price("B01").await.unwrap();
        service.refresh("B01").await.unwrap();

        assert_eq!(service.stats().unwrap().invalidations, 0);
    }

    #[tokio::test]
    async fn test_unresolvable_is_not_cached() {
        let service = service(Moving::new(0), true).await;

        let err = service.get_price("B404").await.unwrap_err();
        assert_eq!(err.product_id(), "B404");
        assert!(service.cache().unwrap().memory().is_empty());
    }
}
