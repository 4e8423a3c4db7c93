//! API error types and status-code mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ender_manager::ManagerError;
use ender_store::StoreError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        if err.is_not_found() {
            return ApiError::NotFound(err.to_string());
        }
        match &err {
            ManagerError::InvalidInput(msg) => ApiError::BadRequest(msg.clone()),
            ManagerError::NotOnline => ApiError::Conflict("server is not online".to_string()),
            ManagerError::Transient(msg) => ApiError::ServiceUnavailable(msg.clone()),
            ManagerError::NoFreePort => ApiError::Internal(err.to_string()),
            ManagerError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ApiError::NotFound(err.to_string())
            }
            ManagerError::Store(e) if e.is_constraint_violation() => {
                ApiError::Conflict(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            _ if err.is_constraint_violation() => ApiError::Conflict(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_online_maps_to_conflict() {
        let api_err: ApiError = ManagerError::NotOnline.into();
        assert!(matches!(api_err, ApiError::Conflict(_)));
        assert!(api_err.to_string().contains("server is not online"));
    }

    #[test]
    fn test_store_not_found_maps_to_404() {
        let api_err: ApiError = ManagerError::Store(StoreError::not_found("server", "x")).into();
        assert!(matches!(api_err, ApiError::NotFound(_)));
    }

    #[test]
    fn test_invalid_input_maps_to_400() {
        let api_err: ApiError = ManagerError::InvalidInput("unknown action: x".to_string()).into();
        assert!(matches!(api_err, ApiError::BadRequest(_)));
    }
}
