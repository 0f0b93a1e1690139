//! Cache entry operations backing the SQLite secondary tier.
//!
//! Entries are keyed by (product_id, resource_set) so that invalidating a
//! product is a single indexed delete regardless of how many views of it
//! were cached.

use std::time::Duration;

use chrono::Utc;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::PriceStore;
use super::records::{format_timestamp, parse_timestamp};
use crate::Error;

impl PriceStore {
    /// Get a live cache entry's JSON payload.
    ///
    /// An expired entry is deleted on the way out and reported as absent.
    pub async fn get_cache_entry(&self, product_id: &str, resource_set: &str) -> Result<Option<String>, Error> {
        let product_id = product_id.to_string();
        let resource_set = resource_set.to_string();
        let now = Utc::now();

        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let result = conn.query_row(
                    "SELECT value_json, expires_at FROM cache_entries
                     WHERE product_id = ?1 AND resource_set = ?2",
                    params![product_id, resource_set],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                );

                let (value_json, expires_at) = match result {
                    Ok(row) => row,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };

                if parse_timestamp(&expires_at)? > now {
                    return Ok(Some(value_json));
                }

                conn.execute(
                    "DELETE FROM cache_entries WHERE product_id = ?1 AND resource_set = ?2",
                    params![product_id, resource_set],
                )?;
                Ok(None)
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace a cache entry with the given time-to-live.
    pub async fn put_cache_entry(
        &self, product_id: &str, resource_set: &str, value_json: &str, ttl: Duration,
    ) -> Result<(), Error> {
        let product_id = product_id.to_string();
        let resource_set = resource_set.to_string();
        let value_json = value_json.to_string();
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::Secondary(format!("ttl out of range: {e}")))?;
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::Secondary("ttl out of range".into()))?;
        let expires_at = format_timestamp(&expires_at);

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_entries (product_id, resource_set, value_json, expires_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(product_id, resource_set) DO UPDATE SET
                         value_json = excluded.value_json,
                         expires_at = excluded.expires_at",
                    params![product_id, resource_set, value_json, expires_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every cached view of a product.
    ///
    /// Returns the number of deleted entries.
    pub async fn delete_cache_entries(&self, product_id: &str) -> Result<u64, Error> {
        let product_id = product_id.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE product_id = ?1", params![product_id])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete expired cache entries.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_expired_cache_entries(&self) -> Result<u64, Error> {
        let now = format_timestamp(&Utc::now());
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE expires_at <= ?1", params![now])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of stored cache entries, live or not.
    pub async fn count_cache_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_put_and_get_entry() {
        let store = PriceStore::open_in_memory().await.unwrap();
        store.put_cache_entry("B01", "", r#"{"price":1}"#, HOUR).await.unwrap();

        let value = store.get_cache_entry("B01", "").await.unwrap();
        assert_eq!(value.as_deref(), Some(r#"{"price":1}"#));
        assert!(store.get_cache_entry("B01", "offers").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_and_purged() {
        let store = PriceStore::open_in_memory().await.unwrap();
        store.put_cache_entry("B01", "", "{}", Duration::ZERO).await.unwrap();

        assert!(store.get_cache_entry("B01", "").await.unwrap().is_none());
        assert_eq!(store.count_cache_entries().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_put_replaces_existing() {
        let store = PriceStore::open_in_memory().await.unwrap();
        store.put_cache_entry("B01", "", r#"{"old":1}"#, HOUR).await.unwrap();
        store.put_cache_entry("B01", "", r#"{"new":2}"#, HOUR).await.unwrap();

        assert_eq!(store.count_cache_entries().await.unwrap(), 1);
        assert_eq!(store.get_cache_entry("B01", "").await.unwrap().as_deref(), Some(r#"{"new":2}"#));
    }

    #[tokio::test]
    async fn test_delete_all_views_of_product() {
        let store = PriceStore::open_in_memory().await.unwrap();
        store.put_cache_entry("B01", "", "{}", HOUR).await.unwrap();
        store.put_cache_entry("B01", "images,offers", "{}", HOUR).await.unwrap();
        store.put_cache_entry("B02", "", "{}", HOUR).await.unwrap();

        assert_eq!(store.delete_cache_entries("B01").await.unwrap(), 2);
        assert!(store.get_cache_entry("B02", "").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_expired_entries() {
        let store = PriceStore::open_in_memory().await.unwrap();
        store.put_cache_entry("expiring", "", "{}", Duration::ZERO).await.unwrap();
        store.put_cache_entry("fresh", "", "{}", HOUR).await.unwrap();

        assert_eq!(store.purge_expired_cache_entries().await.unwrap(), 1);
        assert!(store.get_cache_entry("fresh", "").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_an_error() {
        let store = PriceStore::open_in_memory().await.unwrap();

        let beyond_calendar = Duration::from_secs(9_000_000_000_000_000);
        assert!(matches!(store.put_cache_entry("B01", "", "{}", beyond_calendar).await, Err(Error::Secondary(_))));
        assert!(matches!(store.put_cache_entry("B01", "", "{}", Duration::MAX).await, Err(Error::Secondary(_))));
        assert_eq!(store.count_cache_entries().await.unwrap(), 0);
    }
}
