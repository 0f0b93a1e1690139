//! Price resolution core for pricekeep.
//!
//! This crate provides:
//! - Persistent price store with SQLite backend
//! - Fallback resolver (fresh record, structured API, scraper, stale record)
//!   with per-product single-flight
//! - Tiered cache (memory LRU plus SQLite or Redis secondary tier)
//! - Unified error types and layered configuration

pub mod config;
pub mod error;
pub mod product;
pub mod resolver;
pub mod service;
pub mod store;
pub mod tiered;
pub mod upstream;

pub use config::{AppConfig, ConfigError};
pub use error::{Error, ResolveError, SourceError};
pub use resolver::{Resolution, Resolver, ResolverConfig};
pub use service::PriceService;
pub use store::{PriceRecord, PriceSource, PriceStore};
pub use tiered::{CacheStats, CacheValue, SecondaryBackend, TierConfig, TieredCache};
pub use upstream::{PriceApi, PriceScraper, Unconfigured};
