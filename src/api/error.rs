//! API Error Taxonomy
//!
//! Structured errors for the HTTP surface. Degraded computation is NOT an
//! error (it surfaces as warnings + NOT_EVALUATED scores inside a normal
//! response), and a broken chain is NOT an error (callers branch on
//! `valid`). What remains: malformed input, missing auth, rate limits,
//! append conflicts, unknown resources, a missing threshold source (fail
//! closed), and genuine I/O failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Field-level detail for a 400.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    /// Malformed request payload. 400 with per-field detail.
    Validation(Vec<FieldError>),
    /// Bad or missing API key. 401.
    Auth(&'static str),
    /// Unknown resource. 404.
    NotFound(String),
    /// Concurrent append race. 409 carrying the refreshed head so the
    /// caller can retry.
    Conflict {
        current_head: String,
        current_sequence: Option<u64>,
    },
    /// No threshold source resolved. The verdict path fails closed: 503
    /// rather than silently defaulting to permissive values.
    ThresholdsMissing,
    /// I/O or other internal failure. 500.
    Internal(String),
}

impl ApiError {
    pub fn validation(errors: Vec<FieldError>) -> Self {
        ApiError::Validation(errors)
    }

    pub fn internal(e: impl std::fmt::Display) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "validation_failed",
                    "message": "Request payload is malformed",
                    "fields": errors,
                }),
            ),
            ApiError::Auth(message) => (
                StatusCode::UNAUTHORIZED,
                json!({
                    "error": "unauthorized",
                    "message": message,
                }),
            ),
            ApiError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({
                    "error": "not_found",
                    "message": what,
                }),
            ),
            ApiError::Conflict {
                current_head,
                current_sequence,
            } => (
                StatusCode::CONFLICT,
                json!({
                    "error": "append_conflict",
                    "message": "Claimed prev_hash no longer matches the chain head; re-read and retry",
                    "current_head": current_head,
                    "current_sequence": current_sequence,
                }),
            ),
            ApiError::ThresholdsMissing => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "error": "thresholds_missing",
                    "message": "No threshold source resolved; refusing to compute a verdict",
                    "config_source": "missing",
                }),
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "internal",
                    "message": message,
                }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_the_taxonomy() {
        assert_eq!(
            ApiError::Validation(vec![]).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Auth("missing key").into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::NotFound("instance".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict {
                current_head: "abc".into(),
                current_sequence: Some(4)
            }
            .into_response()
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::ThresholdsMissing.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Internal("boom".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
