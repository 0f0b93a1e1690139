//! HTTP adapters for pricekeep's upstream price sources.
//!
//! This crate provides:
//! - [`ApiClient`]: the quota-limited structured price API
//! - [`ScrapeClient`]: the external scrape service
//!
//! Both implement the core's source traits and report failures as
//! [`ApiError`], which converts into the core's `SourceError`.

pub mod api;
pub mod endpoint;
pub mod error;
pub mod response;
pub mod scrape;

mod limiter;

pub use api::{ApiClient, ApiConfig};
pub use error::ApiError;
pub use response::PriceResponse;
pub use scrape::{ScrapeClient, ScrapeConfig};
