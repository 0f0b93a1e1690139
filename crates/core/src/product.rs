//! Product identifier validation.
//!
//! Product ids (ASINs and the like) are opaque to pricekeep, but they end up
//! in SQL parameters, cache keys and Redis key patterns, so a few shapes are
//! refused up front.

use crate::Error;

/// Maximum accepted product id length in bytes.
pub const MAX_PRODUCT_ID_LEN: usize = 64;

/// Separator between the product id and the resource set in a rendered cache key.
pub const KEY_SEPARATOR: char = '|';

/// Validate a product id and return it trimmed.
///
/// # Errors
///
/// Returns `Error::InvalidProductId` if the id is empty after trimming, longer
/// than [`MAX_PRODUCT_ID_LEN`], contains control characters, or contains the
/// cache key separator.
pub fn validate_product_id(raw: &str) -> Result<&str, Error> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(Error::InvalidProductId("must not be empty".into()));
    }
    if id.len() > MAX_PRODUCT_ID_LEN {
        return Err(Error::InvalidProductId(format!("longer than {MAX_PRODUCT_ID_LEN} bytes")));
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(Error::InvalidProductId("contains control characters".into()));
    }
    if id.contains(KEY_SEPARATOR) {
        return Err(Error::InvalidProductId(format!("contains reserved '{KEY_SEPARATOR}'")));
    }
    Ok(id)
}
