//! SQLite-backed persistent store.
//!
//! Holds the authoritative price record per product and the entries of the
//! SQLite secondary cache tier. Access is async via tokio-rusqlite. This layer
//! has no business logic: no freshness decisions, no fallback ordering.

pub mod connection;
pub mod entries;
pub mod migrations;
pub mod records;

pub use crate::Error;

pub use connection::PriceStore;
pub use records::{PriceRecord, PriceSource};
