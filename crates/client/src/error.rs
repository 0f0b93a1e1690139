//! HTTP adapter error types.

use std::sync::Arc;

use pricekeep_core::SourceError;

use crate::endpoint::UrlError;

/// Errors from the price API and scrape service clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing PRICEKEEP_API_KEY.
    #[error("missing API key: PRICEKEEP_API_KEY not set")]
    MissingApiKey,

    /// Base URL could not be used.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(#[from] UrlError),

    /// Product id is empty after trimming.
    #[error("invalid product id: {0:?}")]
    InvalidProductId(String),

    /// Authentication failed (invalid API key).
    #[error("authentication failed: invalid API key")]
    AuthError,

    /// Upstream refused the request for rate or quota reasons.
    #[error("quota exceeded: too many requests")]
    QuotaExceeded,

    /// HTTP error response.
    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// Response parse error.
    #[error("parse error: {0}")]
    Parse(String),

    /// Response carried a price that can't be right.
    #[error("invalid price: {0}")]
    InvalidPrice(i64),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { ApiError::Timeout } else { ApiError::Network(Arc::new(err)) }
    }
}

impl From<ApiError> for SourceError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::QuotaExceeded => SourceError::QuotaExceeded,
            other => SourceError::upstream(other),
        }
    }
}
