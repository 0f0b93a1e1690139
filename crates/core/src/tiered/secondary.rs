//! Shared secondary tier.
//!
//! Longer-lived than the memory tier and shared between processes. Two
//! backends: a table in the price store's SQLite database, or Redis. Both are
//! externally synchronised, so no in-process locking is added here.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use super::CacheValue;
use super::key::CacheKey;
use crate::Error;
use crate::product::KEY_SEPARATOR;
use crate::store::PriceStore;

/// Startup budget for reaching Redis before falling back to memory only.
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Keys scanned per SCAN round trip during invalidation.
const REDIS_SCAN_COUNT: usize = 200;

/// Which secondary tier to run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondaryBackend {
    #[default]
    Sqlite,
    Redis,
    None,
}

impl SecondaryBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecondaryBackend::Sqlite => "sqlite",
            SecondaryBackend::Redis => "redis",
            SecondaryBackend::None => "none",
        }
    }
}

#[async_trait]
pub trait SecondaryTier: Send + Sync {
    /// Short backend name for logs and stats.
    fn name(&self) -> &'static str;

    /// Live value for a key; expired entries read as absent.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>, Error>;

    async fn put(&self, key: &CacheKey, value: &CacheValue, ttl: Duration) -> Result<(), Error>;

    /// Remove every entry of a product, whatever its resource set.
    async fn invalidate(&self, product_id: &str) -> Result<u64, Error>;

    /// Drop expired entries, for backends that don't expire on their own.
    async fn purge_expired(&self) -> Result<u64, Error>;
}

/// Secondary tier stored in the price store's `cache_entries` table.
pub struct SqliteTier {
    store: PriceStore,
}

impl SqliteTier {
    pub fn new(store: PriceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SecondaryTier for SqliteTier {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>, Error> {
        let raw = self.store.get_cache_entry(key.product_id(), key.discriminator()).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(Error::from)).transpose()
    }

    async fn put(&self, key: &CacheKey, value: &CacheValue, ttl: Duration) -> Result<(), Error> {
        let json = serde_json::to_string(value)?;
        self.store
            .put_cache_entry(key.product_id(), key.discriminator(), &json, ttl)
            .await
    }

    async fn invalidate(&self, product_id: &str) -> Result<u64, Error> {
        self.store.delete_cache_entries(product_id).await
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        self.store.purge_expired_cache_entries().await
    }
}

/// Secondary tier in Redis, one string key per cache key with `SET EX`.
///
/// Keys look like `{namespace}:{product_id}` and
/// `{namespace}:{product_id}|{resource_set}`.
pub struct RedisTier {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisTier {
    /// Connect and verify the server answers `PING`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Secondary` if the URL is invalid, the server can't be
    /// reached within a few seconds, or `PING` fails.
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url)?;
        let mut conn = tokio::time::timeout(REDIS_CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| Error::Secondary(format!("connect timed out after {}s", REDIS_CONNECT_TIMEOUT.as_secs())))??;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self { conn, namespace: namespace.to_string() })
    }

    fn redis_key(&self, key: &CacheKey) -> String {
        format!("{}:{key}", self.namespace)
    }

    /// SCAN pattern matching every resource-set view of a product.
    fn views_pattern(&self, product_id: &str) -> String {
        format!("{}:{}{KEY_SEPARATOR}*", escape_glob(&self.namespace), escape_glob(product_id))
    }
}

/// Escape Redis glob metacharacters.
fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl SecondaryTier for RedisTier {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>, Error> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.redis_key(key)).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(Error::from)).transpose()
    }

    async fn put(&self, key: &CacheKey, value: &CacheValue, ttl: Duration) -> Result<(), Error> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        // SET EX rejects 0; a zero TTL means "already expired".
        if ttl.as_secs() == 0 {
            let _: () = conn.del(self.redis_key(key)).await?;
            return Ok(());
        }
        let _: () = conn.set_ex(self.redis_key(key), json, ttl.as_secs()).await?;
        Ok(())
    }

    async fn invalidate(&self, product_id: &str) -> Result<u64, Error> {
        let mut conn = self.conn.clone();
        let mut doomed = vec![format!("{}:{product_id}", self.namespace)];

        let pattern = self.views_pattern(product_id);
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(REDIS_SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            doomed.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let deleted: u64 = conn.del(doomed).await?;
        Ok(deleted)
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        Ok(0)
    }
}
