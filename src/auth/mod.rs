//! Authentication Middleware
//!
//! API-key protection for the internal endpoints. The key arrives in the
//! `X-Api-Key` header and is compared in constant time against the key
//! from the environment.

use crate::api::error::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared auth state: the expected key.
#[derive(Clone)]
pub struct AuthState {
    expected_key: Arc<String>,
}

impl AuthState {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            expected_key: Arc::new(api_key.into()),
        }
    }
}

/// Middleware validating the API key on every request it wraps.
pub async fn api_key_middleware(
    State(auth): State<AuthState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::Auth("Missing X-Api-Key header"))?;

    if !constant_time_eq(presented.as_bytes(), auth.expected_key.as_bytes()) {
        return Err(ApiError::Auth("Invalid API key"));
    }

    Ok(next.run(req).await)
}

/// Length-safe constant-time comparison; never early-exits on a byte
/// mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
