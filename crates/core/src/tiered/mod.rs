//! Tiered cache manager.
//!
//! Sits in front of the resolver with two tiers:
//!
//! - memory: bounded strict LRU, short TTL, per process
//! - secondary: shared, longer TTL, SQLite or Redis
//!
//! Reads go memory first, then secondary (backfilling memory on a hit).
//! Writes go to both tiers. The secondary tier is optional infrastructure:
//! if it can't be reached the cache runs memory-only and never reports an
//! error to callers.

pub mod key;
pub mod memory;
pub mod secondary;
pub mod stats;

pub use key::CacheKey;
pub use memory::{MemoryLookup, MemoryTier};
pub use secondary::{RedisTier, SecondaryBackend, SecondaryTier, SqliteTier};
pub use stats::CacheStats;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::product::validate_product_id;
use crate::resolver::Resolution;
use crate::store::{PriceSource, PriceStore};
use stats::Counters;

/// Redis key namespace for cache entries.
const REDIS_NAMESPACE: &str = "pricekeep";

/// Tiered cache settings.
#[derive(Debug, Clone)]
pub struct TierConfig {
    pub memory_capacity: usize,
    pub memory_ttl: Duration,
    pub secondary_ttl: Duration,
    pub backend: SecondaryBackend,
    pub redis_url: Option<String>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 1_000,
            memory_ttl: Duration::from_secs(3_600),
            secondary_ttl: Duration::from_secs(86_400),
            backend: SecondaryBackend::Sqlite,
            redis_url: None,
        }
    }
}

/// Payload held by both tiers: a price plus optional enrichment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheValue {
    pub price: i64,
    pub source: PriceSource,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<serde_json::Value>,
}

impl From<&Resolution> for CacheValue {
    fn from(resolution: &Resolution) -> Self {
        Self {
            price: resolution.price,
            source: resolution.source,
            fetched_at: resolution.fetched_at,
            enrichment: None,
        }
    }
}

pub struct TieredCache {
    memory: MemoryTier,
    secondary: Option<Box<dyn SecondaryTier>>,
    secondary_ttl: Duration,
    degraded: bool,
    counters: Counters,
}

impl TieredCache {
    /// Cache with no secondary tier.
    pub fn memory_only(config: &TierConfig) -> Self {
        Self::build(config, None, false)
    }

    /// Cache over an already constructed secondary tier.
    pub fn with_secondary(config: &TierConfig, secondary: Box<dyn SecondaryTier>) -> Self {
        Self::build(config, Some(secondary), false)
    }

    /// Build the configured secondary backend.
    ///
    /// Never fails: if the backend can't be set up the cache logs a warning
    /// and runs memory-only, reported as `degraded` in [`CacheStats`].
    pub async fn connect(config: &TierConfig, store: &PriceStore) -> Self {
        match config.backend {
            SecondaryBackend::None => Self::memory_only(config),
            SecondaryBackend::Sqlite => Self::with_secondary(config, Box::new(SqliteTier::new(store.clone()))),
            SecondaryBackend::Redis => {
                let Some(url) = config.redis_url.as_deref() else {
                    tracing::warn!(source = "secondary", "redis backend selected without a URL, running memory-only");
                    return Self::build(config, None, true);
                };
                match RedisTier::connect(url, REDIS_NAMESPACE).await {
                    Ok(tier) => Self::with_secondary(config, Box::new(tier)),
                    Err(e) => {
                        tracing::warn!(source = "secondary", error = %e, "redis unavailable, running memory-only");
                        Self::build(config, None, true)
                    }
                }
            }
        }
    }

    fn build(config: &TierConfig, secondary: Option<Box<dyn SecondaryTier>>, degraded: bool) -> Self {
        Self {
            memory: MemoryTier::new(config.memory_capacity, config.memory_ttl),
            secondary,
            secondary_ttl: config.secondary_ttl,
            degraded,
            counters: Counters::default(),
        }
    }

    /// Look up a product view. Infrastructure failures read as a miss.
    pub async fn get(&self, product_id: &str, resource_set: Option<&[&str]>) -> Option<CacheValue> {
        let key = match CacheKey::new(product_id, resource_set) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(product_id, error = %e, "invalid cache key");
                Counters::bump(&self.counters.misses);
                return None;
            }
        };

        let (lookup, generation) = self.memory.lookup(&key);
        match lookup {
            MemoryLookup::Hit(value) => {
                Counters::bump(&self.counters.memory_hits);
                tracing::debug!(key = %key, "memory hit");
                return Some(value);
            }
            MemoryLookup::Expired => Counters::bump(&self.counters.expired_evictions),
            MemoryLookup::Miss => {}
        }

        if let Some(secondary) = &self.secondary {
            match secondary.get(&key).await {
                Ok(Some(value)) => {
                    Counters::bump(&self.counters.secondary_hits);
                    tracing::debug!(key = %key, backend = secondary.name(), "secondary hit");
                    if self.memory.insert_if_generation(key, value.clone(), generation) {
                        Counters::bump(&self.counters.backfills);
                    }
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => self.secondary_failed("get", &key.to_string(), &e),
            }
        }

        Counters::bump(&self.counters.misses);
        None
    }

    /// Read a view without side effects: no hit or miss counters, no LRU
    /// promotion, no backfill. Secondary failures are still counted.
    pub async fn peek(&self, product_id: &str, resource_set: Option<&[&str]>) -> Option<CacheValue> {
        let key = CacheKey::new(product_id, resource_set).ok()?;
        if let Some(value) = self.memory.peek(&key) {
            return Some(value);
        }

        let secondary = self.secondary.as_ref()?;
        match secondary.get(&key).await {
            Ok(value) => value,
            Err(e) => {
                self.secondary_failed("peek", &key.to_string(), &e);
                None
            }
        }
    }

    /// Write a value into both tiers.
    pub async fn put(&self, product_id: &str, resource_set: Option<&[&str]>, value: CacheValue) {
        let key = match CacheKey::new(product_id, resource_set) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(product_id, error = %e, "refusing to cache invalid key");
                return;
            }
        };

        if let Some(secondary) = &self.secondary
            && let Err(e) = secondary.put(&key, &value, self.secondary_ttl).await
        {
            self.secondary_failed("put", &key.to_string(), &e);
        }

        if let Some(evicted) = self.memory.insert(key, value) {
            tracing::debug!(evicted = %evicted, "memory tier full, evicted least recently used");
        }
        Counters::bump(&self.counters.puts);
    }

    /// Remove every cached view of a product from both tiers.
    ///
    /// The secondary tier is cleared first; the memory purge then bumps the
    /// product's generation so that a concurrent `get` which already read
    /// the old secondary value can't backfill it into memory.
    pub async fn invalidate(&self, product_id: &str) {
        let product_id = match validate_product_id(product_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(product_id, error = %e, "ignoring invalidation of invalid id");
                return;
            }
        };

        let mut removed_secondary = 0;
        if let Some(secondary) = &self.secondary {
            match secondary.invalidate(product_id).await {
                Ok(n) => removed_secondary = n,
                Err(e) => self.secondary_failed("invalidate", product_id, &e),
            }
        }

        let removed_memory = self.memory.invalidate(product_id);
        Counters::bump(&self.counters.invalidations);
        tracing::debug!(product_id, removed_memory, removed_secondary, "invalidated");
    }

    /// Drop expired entries from both tiers. Returns the total removed.
    pub async fn purge_expired(&self) -> u64 {
        let from_memory = self.memory.purge_expired() as u64;
        Counters::add(&self.counters.expired_evictions, from_memory);

        let mut from_secondary = 0;
        if let Some(secondary) = &self.secondary {
            match secondary.purge_expired().await {
                Ok(n) => from_secondary = n,
                Err(e) => self.secondary_failed("purge", "*", &e),
            }
        }

        from_memory + from_secondary
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.memory.len(), self.degraded, self.backend())
    }

    /// True when a configured secondary tier could not be set up.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Name of the active secondary backend, `none` when memory-only.
    pub fn backend(&self) -> &'static str {
        self.secondary.as_ref().map_or("none", |s| s.name())
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    fn secondary_failed(&self, op: &str, key: &str, error: &crate::Error) {
        Counters::bump(&self.counters.secondary_errors);
        tracing::warn!(source = "secondary", op, key, error = %error, "secondary tier operation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use async_trait::async_trait;

    fn value(price: i64) -> CacheValue {
        CacheValue { price, source: PriceSource::StructuredApi, fetched_at: Utc::now(), enrichment: None }
    }

    async fn sqlite_cache(store: &PriceStore, config: &TierConfig) -> TieredCache {
        TieredCache::with_secondary(config, Box::new(SqliteTier::new(store.clone())))
    }

    struct Broken;

    #[async_trait]
    impl SecondaryTier for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, _key: &CacheKey) -> Result<Option<CacheValue>, Error> {
            Err(Error::Secondary("connection reset".into()))
        }

        async fn put(&self, _key: &CacheKey, _value: &CacheValue, _ttl: Duration) -> Result<(), Error> {
            Err(Error::Secondary("connection reset".into()))
        }

        async fn invalidate(&self, _product_id: &str) -> Result<u64, Error> {
            Err(Error::Secondary("connection reset".into()))
        }

        async fn purge_expired(&self) -> Result<u64, Error> {
            Err(Error::Secondary("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_put_then_get_hits_memory() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let cache = sqlite_cache(&store, &TierConfig::default()).await;

        cache.put("B01", None, value(100)).await;

        assert_eq!(cache.get("B01", None).await.map(|v| v.price), Some(100));
        let stats = cache.stats();
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.secondary_hits, 0);
        assert_eq!(stats.puts, 1);
        assert_eq!(stats.backend, "sqlite");
        assert_eq!(store.count_cache_entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_secondary_hit_backfills_memory() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let writer = sqlite_cache(&store, &TierConfig::default()).await;
        let reader = sqlite_cache(&store, &TierConfig::default()).await;

        writer.put("B01", Some(&["offers"]), value(100)).await;

        assert_eq!(reader.get("B01", Some(&["offers"])).await.map(|v| v.price), Some(100));
        assert_eq!(reader.memory().len(), 1);
        assert_eq!(reader.get("B01", Some(&["offers"])).await.map(|v| v.price), Some(100));

        let stats = reader.stats();
        assert_eq!(stats.secondary_hits, 1);
        assert_eq!(stats.backfills, 1);
        assert_eq!(stats.memory_hits, 1);
    }

    #[tokio::test]
    async fn test_expired_memory_entry_falls_back_to_secondary() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let config = TierConfig { memory_ttl: Duration::ZERO, ..Default::default() };
        let cache = sqlite_cache(&store, &config).await;

        cache.put("B01", None, value(100)).await;

        assert_eq!(cache.get("B01", None).await.map(|v| v.price), Some(100));
        let stats = cache.stats();
        assert_eq!(stats.expired_evictions, 1);
        assert_eq!(stats.secondary_hits, 1);
    }

    #[tokio::test]
    async fn test_resource_set_order_does_not_matter() {
        let cache = TieredCache::memory_only(&TierConfig::default());

        cache.put("B01", Some(&["rating", "offers"]), value(7)).await;

        assert!(cache.get("B01", Some(&["offers", "rating"])).await.is_some());
        assert!(cache.get("B01", None).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_clears_every_view_in_both_tiers() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let cache = sqlite_cache(&store, &TierConfig::default()).await;

        cache.put("B01", None, value(1)).await;
        cache.put("B01", Some(&["offers"]), value(2)).await;
        cache.put("B02", None, value(3)).await;

        cache.invalidate("B01").await;

        assert!(cache.get("B01", None).await.is_none());
        assert!(cache.get("B01", Some(&["offers"])).await.is_none());
        assert!(cache.get("B02", None).await.is_some());
        assert_eq!(store.count_cache_entries().await.unwrap(), 1);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_broken_secondary_degrades_to_memory() {
        let cache = TieredCache::with_secondary(&TierConfig::default(), Box::new(Broken));

        assert!(cache.get("B01", None).await.is_none());
        cache.put("B01", None, value(5)).await;
        assert_eq!(cache.get("B01", None).await.map(|v| v.price), Some(5));
        cache.invalidate("B01").await;
        assert!(cache.get("B01", None).await.is_none());

        let stats = cache.stats();
        // get miss, put, invalidate, get after invalidate
        assert_eq!(stats.secondary_errors, 4);
        assert!(!stats.degraded);
    }

    #[tokio::test]
    async fn test_connect_without_redis_url_is_degraded() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let config = TierConfig { backend: SecondaryBackend::Redis, ..Default::default() };

        let cache = TieredCache::connect(&config, &store).await;

        assert!(cache.is_degraded());
        assert_eq!(cache.backend(), "none");
        cache.put("B01", None, value(9)).await;
        assert_eq!(cache.get("B01", None).await.map(|v| v.price), Some(9));
        assert!(cache.stats().degraded);
    }

    #[tokio::test]
    async fn test_connect_unreachable_redis_is_degraded() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let config = TierConfig {
            backend: SecondaryBackend::Redis,
            redis_url: Some("redis://127.0.0.1:1/".into()),
            ..Default::default()
        };

        let cache = TieredCache::connect(&config, &store).await;
        assert!(cache.is_degraded());
    }

    #[tokio::test]
    async fn test_connect_none_backend_is_not_degraded() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let config = TierConfig { backend: SecondaryBackend::None, ..Default::default() };

        let cache = TieredCache::connect(&config, &store).await;
        assert!(!cache.is_degraded());
        assert_eq!(cache.backend(), "none");
    }

    #[tokio::test]
    async fn test_invalid_ids_are_ignored() {
        let cache = TieredCache::memory_only(&TierConfig::default());

        cache.put("bad|id", None, value(1)).await;
        cache.invalidate("").await;

        assert!(cache.get("bad|id", None).await.is_none());
        assert!(cache.memory().is_empty());
        assert_eq!(cache.stats().puts, 0);
    }

    #[tokio::test]
    async fn test_peek_leaves_stats_and_tiers_alone() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let writer = sqlite_cache(&store, &TierConfig::default()).await;
        let reader = sqlite_cache(&store, &TierConfig::default()).await;
        writer.put("B01", None, value(100)).await;

        assert_eq!(writer.peek("B01", None).await.map(|v| v.price), Some(100));
        assert_eq!(reader.peek("B01", None).await.map(|v| v.price), Some(100));
        assert!(reader.peek("B02", None).await.is_none());

        assert!(reader.memory().is_empty());
        for stats in [writer.stats(), reader.stats()] {
            assert_eq!(stats.memory_hits + stats.secondary_hits + stats.misses + stats.backfills, 0);
        }
    }

    #[tokio::test]
    async fn test_put_with_unbounded_ttls_does_not_panic() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let config = TierConfig { memory_ttl: Duration::MAX, secondary_ttl: Duration::MAX, ..Default::default() };
        let cache = sqlite_cache(&store, &config).await;

        cache.put("B01", None, value(100)).await;

        assert_eq!(cache.get("B01", None).await.map(|v| v.price), Some(100));
        // The secondary write is refused and counted, the memory tier still serves.
        assert_eq!(cache.stats().secondary_errors, 1);
    }

    #[tokio::test]
    async fn test_purge_expired_counts_both_tiers() {
        let store = PriceStore::open_in_memory().await.unwrap();
        let config =
            TierConfig { memory_ttl: Duration::ZERO, secondary_ttl: Duration::ZERO, ..Default::default() };
        let cache = sqlite_cache(&store, &config).await;

        cache.put("B01", None, value(1)).await;
        cache.put("B02", None, value(2)).await;

        assert_eq!(cache.purge_expired().await, 4);
        assert_eq!(cache.stats().expired_evictions, 2);
        assert_eq!(store.count_cache_entries().await.unwrap(), 0);
    }
}
