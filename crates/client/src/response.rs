//! Response handling shared by both upstream clients.

use reqwest::{Response, StatusCode};
use serde::Deserialize;

use crate::ApiError;

/// Price payload returned by the price API and the scrape service.
///
/// Extra fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceResponse {
    /// Price in the smallest currency subunit.
    pub price: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Map an HTTP status to the adapter error it stands for, if any.
pub(crate) fn check_status(status: StatusCode) -> Result<(), ApiError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::AuthError);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ApiError::QuotaExceeded);
    }

    if status.is_client_error() || status.is_server_error() {
        return Err(ApiError::HttpError { status: status.as_u16() });
    }

    Ok(())
}

/// Check the status and decode a positive price from the body.
pub(crate) async fn read_price(response: Response) -> Result<PriceResponse, ApiError> {
    check_status(response.status())?;

    let bytes = response.bytes().await?;
    let body: PriceResponse = serde_json::from_slice(&bytes).map_err(|e| ApiError::Parse(e.to_string()))?;

    if body.price <= 0 {
        return Err(ApiError::InvalidPrice(body.price));
    }
    Ok(body)
}
