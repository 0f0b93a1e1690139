//! Price record CRUD operations.
//!
//! One row per product. Writes are compare-and-swap on `fetched_at`, so a
//! slow resolution that finishes late can't overwrite a newer price. Freshness
//! decisions live in the resolver; this layer only stores and returns rows.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::PriceStore;
use crate::Error;

/// Which upstream path produced a price.
///
/// Provenance only; never used for lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    StructuredApi,
    Scraper,
    StaleFallback,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::StructuredApi => "structured_api",
            PriceSource::Scraper => "scraper",
            PriceSource::StaleFallback => "stale_fallback",
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structured_api" => Ok(PriceSource::StructuredApi),
            "scraper" => Ok(PriceSource::Scraper),
            "stale_fallback" => Ok(PriceSource::StaleFallback),
            other => Err(Error::CorruptRecord(format!("unknown price source '{other}'"))),
        }
    }
}

/// The last known price of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub product_id: String,
    /// Smallest currency subunit (paise, cents).
    pub price: i64,
    pub fetched_at: DateTime<Utc>,
    pub source: PriceSource,
}

impl PriceRecord {
    /// A record fetched right now.
    pub fn new(product_id: impl Into<String>, price: i64, source: PriceSource) -> Self {
        Self { product_id: product_id.into(), price, fetched_at: Utc::now(), source }
    }

    /// Whether the record is younger than `window` at `now`.
    ///
    /// A `fetched_at` in the future (clock skew) counts as fresh.
    pub fn is_fresh(&self, window: Duration, now: DateTime<Utc>) -> bool {
        match (now - self.fetched_at).to_std() {
            Ok(age) => age < window,
            Err(_) => true,
        }
    }
}

/// Fixed-width RFC 3339 so that text comparison in SQL matches time order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::CorruptRecord(format!("bad timestamp '{raw}': {e}")))
}

fn cutoff(window: Duration) -> DateTime<Utc> {
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(36_500));
    Utc::now() - window
}

impl PriceStore {
    /// Get the record for a product.
    ///
    /// Returns None if the product has never been priced.
    pub async fn get_price_record(&self, product_id: &str) -> Result<Option<PriceRecord>, Error> {
        let product_id = product_id.to_string();
        let row = self
            .conn
            .call(move |conn| -> Result<Option<(String, i64, String, String)>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT product_id, price, fetched_at, source
                     FROM price_records WHERE product_id = ?1",
                )?;

                let result = stmt.query_row(params![product_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                });

                match result {
                    Ok(r) => Ok(Some(r)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        row.map(|(product_id, price, fetched_at, source)| {
            Ok(PriceRecord { product_id, price, fetched_at: parse_timestamp(&fetched_at)?, source: source.parse()? })
        })
        .transpose()
    }

    /// Insert or update a price record.
    ///
    /// Last writer wins by `fetched_at`: an existing row is only replaced when
    /// the incoming record is not older. Returns whether the write landed.
    pub async fn upsert_price_record(&self, record: &PriceRecord) -> Result<bool, Error> {
        let product_id = record.product_id.clone();
        let price = record.price;
        let fetched_at = format_timestamp(&record.fetched_at);
        let source = record.source.as_str();

        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let changed = conn.execute(
                    "INSERT INTO price_records (product_id, price, fetched_at, source)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(product_id) DO UPDATE SET
                         price = excluded.price,
                         fetched_at = excluded.fetched_at,
                         source = excluded.source
                     WHERE excluded.fetched_at >= price_records.fetched_at",
                    params![product_id, price, fetched_at, source],
                )?;
                Ok(changed > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Product ids whose record is older than `window`, oldest first.
    pub async fn stale_product_ids(&self, window: Duration, limit: usize) -> Result<Vec<String>, Error> {
        let cutoff = format_timestamp(&cutoff(window));
        let limit = limit as i64;
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT product_id FROM price_records
                     WHERE fetched_at < ?1
                     ORDER BY fetched_at ASC
                     LIMIT ?2",
                )?;
                let ids = stmt
                    .query_map(params![cutoff, limit], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(ids)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of stored price records.
    pub async fn count_price_records(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM price_records", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove a product's record. Operator action only; nothing deletes
    /// records automatically.
    ///
    /// Returns whether a row was deleted.
    pub async fn delete_price_record(&self, product_id: &str) -> Result<bool, Error> {
        let product_id = product_id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM price_records WHERE product_id = ?1", params![product_id])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }
}
