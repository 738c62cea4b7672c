//! Gateway error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use cookiescan_kernel::store::StoreError;
use cookiescan_runtime::executor::ScanError;

/// Gateway-level errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ScanError> for GatewayError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::InvalidParams(p) => GatewayError::InvalidRequest(p.to_string()),
            ScanError::Store(s) => GatewayError::Storage(s),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GatewayError::NotFound(what) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", what.clone())
            }
            GatewayError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg.clone())
            }
            GatewayError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            GatewayError::Storage(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                e.to_string(),
            ),
            GatewayError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
