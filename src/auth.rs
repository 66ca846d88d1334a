//! Service API-key validation. Closed by default: with no configured
//! secret, every caller is rejected.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Compares digests so timing does not depend on where the keys differ.
pub fn validate_service_api_key(expected: Option<&str>, provided: Option<&str>) -> bool {
    let Some(expected) = expected.filter(|value| !value.is_empty()) else {
        return false;
    };
    let Some(provided) = provided else {
        return false;
    };
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}

pub fn api_key_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
