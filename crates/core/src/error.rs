//! Error taxonomy for pricekeep.
//!
//! Three layers, from the inside out:
//!
//! - [`Error`]: infrastructure failures (store, secondary tier, bad input).
//! - [`SourceError`]: soft failures reported by an upstream price source.
//!   The resolver logs and absorbs these.
//! - [`ResolveError`]: the single terminal outcome callers of `get_price` can see.

use tokio_rusqlite::rusqlite;

/// Infrastructure errors raised by the store and cache tiers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Product id failed validation.
    #[error("INVALID_PRODUCT_ID: {0}")]
    InvalidProductId(String),

    /// Database operation failed.
    #[error("STORE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be decoded (bad timestamp or source tag).
    #[error("STORE_ERROR: corrupt record: {0}")]
    CorruptRecord(String),

    /// Secondary cache tier failed (connection, command, or decode).
    #[error("SECONDARY_ERROR: {0}")]
    Secondary(String),

    /// Cache payload could not be encoded or decoded.
    #[error("SERIALIZE_ERROR: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Secondary(err.to_string())
    }
}

/// Soft failure from a single upstream price source.
///
/// Always recoverable by moving on to the next source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Upstream refused the call because of rate or quota limits.
    #[error("QUOTA_EXCEEDED")]
    QuotaExceeded,

    /// Any other failure: network, parse, timeout, bad price.
    #[error("UPSTREAM_ERROR: {0}")]
    Upstream(String),
}

impl SourceError {
    /// Build an `Upstream` error from anything displayable.
    pub fn upstream(detail: impl std::fmt::Display) -> Self {
        SourceError::Upstream(detail.to_string())
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, SourceError::QuotaExceeded)
    }
}

/// Terminal resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Every source was exhausted and no record exists at all.
    #[error("UNRESOLVABLE: no price available for {product_id}")]
    Unresolvable { product_id: String },
}

impl ResolveError {
    pub fn unresolvable(product_id: impl Into<String>) -> Self {
        ResolveError::Unresolvable { product_id: product_id.into() }
    }

    pub fn product_id(&self) -> &str {
        match self {
            ResolveError::Unresolvable { product_id } => product_id,
        }
    }
}
