//! Endpoint URL construction.

use url::Url;

/// Error type for endpoint construction failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty base URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Parse and check a service base URL.
///
/// Only http and https are accepted. A trailing slash is dropped so paths
/// can be appended segment by segment.
pub fn parse_base(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let parsed = Url::parse(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }
    if parsed.cannot_be_a_base() {
        return Err(UrlError::InvalidUrl(format!("{trimmed} cannot be a base")));
    }

    Ok(parsed)
}

/// Append path segments to `base`, percent-encoding each one.
///
/// A product id containing `/` or `?` stays a single segment.
pub fn join_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_strips_trailing_slash() {
        let base = parse_base(" https://api.example.com/v1/ ").unwrap();
        assert_eq!(base.as_str(), "https://api.example.com/v1");
    }

    #[test]
    fn test_parse_base_rejects_bad_input() {
        assert!(matches!(parse_base("   "), Err(UrlError::Empty)));
        assert!(matches!(parse_base("ftp://example.com"), Err(UrlError::UnsupportedScheme(_))));
        assert!(matches!(parse_base("not a url"), Err(UrlError::InvalidUrl(_))));
    }

    #[test]
    fn test_join_segments() {
        let base = parse_base("https://api.example.com/v1").unwrap();
        let url = join_segments(&base, &["products", "B0TEST123", "price"]);
        assert_eq!(url.as_str(), "https://api.example.com/v1/products/B0TEST123/price");
    }

    #[test]
    fn test_join_segments_encodes_reserved_characters() {
        let base = parse_base("http://localhost:8080").unwrap();
        let url = join_segments(&base, &["scrape", "a/b?c d"]);
        assert_eq!(url.path(), "/scrape/a%2Fb%3Fc%20d");
    }
}
