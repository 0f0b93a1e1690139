//! Contracts for the upstream price sources.
//!
//! Both sources are external collaborators. The resolver only needs a price
//! in the smallest currency subunit or a [`SourceError`]; timeouts are applied
//! by the resolver, not by implementors.

use async_trait::async_trait;

use crate::SourceError;

/// Quota-limited structured data API.
#[async_trait]
pub trait PriceApi: Send + Sync {
    /// Fetch the current price of a product.
    ///
    /// Implementations report rate or quota refusals as
    /// [`SourceError::QuotaExceeded`] and everything else as
    /// [`SourceError::Upstream`].
    async fn fetch_price(&self, product_id: &str) -> Result<i64, SourceError>;
}

/// Fallback HTML scraper.
#[async_trait]
pub trait PriceScraper: Send + Sync {
    async fn scrape_price(&self, product_id: &str) -> Result<i64, SourceError>;
}

/// Stand-in for a source that has not been configured.
///
/// Every call fails softly, so the resolver moves on to the next source.
#[derive(Debug, Clone, Copy)]
pub struct Unconfigured {
    source: &'static str,
}

impl Unconfigured {
    pub fn new(source: &'static str) -> Self {
        Self { source }
    }
}

#[async_trait]
impl PriceApi for Unconfigured {
    async fn fetch_price(&self, _product_id: &str) -> Result<i64, SourceError> {
        Err(SourceError::upstream(format!("{} not configured", self.source)))
    }
}

#[async_trait]
impl PriceScraper for Unconfigured {
    async fn scrape_price(&self, _product_id: &str) -> Result<i64, SourceError> {
        Err(SourceError::upstream(format!("{} not configured", self.source)))
    }
}
