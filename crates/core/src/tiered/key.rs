//! Composite cache keys.

use std::fmt;

use crate::Error;
use crate::product::{KEY_SEPARATOR, validate_product_id};

/// Cache key: a product id plus an optional resource-set discriminator.
///
/// The resource set is normalised (trimmed, empties dropped, deduplicated,
/// sorted) so that field order never produces a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    product_id: String,
    resource_set: Option<String>,
}

impl CacheKey {
    /// Build a key.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidProductId` if the product id fails validation.
    pub fn new(product_id: &str, resource_set: Option<&[&str]>) -> Result<Self, Error> {
        let product_id = validate_product_id(product_id)?.to_string();
        Ok(Self { product_id, resource_set: resource_set.and_then(normalize_resource_set) })
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn resource_set(&self) -> Option<&str> {
        self.resource_set.as_deref()
    }

    /// Resource set as stored in the SQLite tier, `""` for the plain view.
    pub fn discriminator(&self) -> &str {
        self.resource_set.as_deref().unwrap_or("")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource_set {
            Some(set) => write!(f, "{}{KEY_SEPARATOR}{set}", self.product_id),
            None => f.write_str(&self.product_id),
        }
    }
}

fn normalize_resource_set(fields: &[&str]) -> Option<String> {
    let mut fields: Vec<&str> = fields.iter().map(|f| f.trim()).filter(|f| !f.is_empty()).collect();
    if fields.is_empty() {
        return None;
    }
    fields.sort_unstable();
    fields.dedup();
    Some(fields.join(","))
}
