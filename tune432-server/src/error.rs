//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};
use tune432::{ErrorKind, ErrorReport};

/// Message returned for unknown or expired artifacts.
const NOT_FOUND_MESSAGE: &str = "File not found or expired";

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Pipeline failure, already classified.
    #[error(transparent)]
    Conversion(#[from] ErrorReport),

    /// Unknown job id or missing artifact (404)
    #[error("not found: {0}")]
    NotFound(String),

    /// Request that could not be decoded (400)
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Store or other library failure
    #[error(transparent)]
    Library(#[from] tune432::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Conversion(report) => (
                StatusCode::from_u16(report.kind.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                report.kind,
                report.message,
            ),
            ApiError::NotFound(what) | ApiError::Library(tune432::Error::ArtifactNotFound(what)) => {
                debug!(%what, "not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorKind::NotFound,
                    NOT_FOUND_MESSAGE.to_string(),
                )
            }
            ApiError::BadRequest(detail) => {
                debug!(%detail, "rejected request");
                let kind = ErrorKind::InvalidInput;
                (StatusCode::BAD_REQUEST, kind, kind.user_message().to_string())
            }
            ApiError::Library(err) => {
                error!(error = %err, "request failed");
                let kind = ErrorKind::InternalError;
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    kind,
                    kind.user_message().to_string(),
                )
            }
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "kind": kind,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
