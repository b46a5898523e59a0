//! API error types and responses.
//!
//! Every error renders as `{"error": {"code", "message"}}`. Agents key off
//! `code`, so conflicts an operator can act on get their own code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::error::ControlError;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The requested record was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The server's port range cannot fit the request.
    #[error("{0}")]
    PortsExhausted(String),

    /// The record's current status does not allow the operation.
    #[error("{0}")]
    InvalidTransition(String),

    /// Invalid request body or parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::PortsExhausted(_) | Self::InvalidTransition(_) => {
                StatusCode::CONFLICT
            }
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::PortsExhausted(_) => "ports_exhausted",
            Self::InvalidTransition(_) => "invalid_state",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": { "code": self.code(), "message": self.to_string() }
        });
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::PortsExhausted { .. } => Self::PortsExhausted(err.to_string()),
            ControlError::InvalidState { .. } => Self::InvalidTransition(err.to_string()),
            ControlError::Store(store_err) if is_storage_failure(&store_err) => {
                tracing::error!(error = %store_err, "Store error");
                Self::Internal("storage error".to_string())
            }
            ControlError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                Self::Internal(msg)
            }
            other => match other.http_status_code() {
                404 => Self::NotFound(other.to_string()),
                409 => Self::Conflict(other.to_string()),
                _ => Self::BadRequest(other.to_string()),
            },
        }
    }
}

const fn is_storage_failure(err: &fleet_store::StoreError) -> bool {
    !matches!(
        err,
        fleet_store::StoreError::NotFound | fleet_store::StoreError::Conflict(_)
    )
}
