//! Server error types with HTTP status code mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use disclosure_db_api::ApiError;
use disclosure_db_core::CoreError;
use disclosure_db_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Server error type wrapping API errors, with HTTP status mapping.
#[derive(Error, Debug)]
pub enum ServerError {
    /// API layer error
    #[error("{0}")]
    Api(#[from] ApiError),

    /// JSON parsing error
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic bad request error
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal error
    #[error("{0}")]
    Internal(String),
}

impl ServerError {
    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ServerError::BadRequest(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        ServerError::Internal(msg.into())
    }

    /// Stable error type tag for API responses.
    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Api(ApiError::NotFound(_)) => "err:db/NotFound",
            ServerError::Api(ApiError::Conflict(_)) => "err:db/Conflict",
            ServerError::Api(ApiError::BadRequest(_)) => "err:db/BadRequest",
            ServerError::Api(ApiError::Core(CoreError::PathFormat(_))) => "err:db/MalformedPath",
            ServerError::Api(ApiError::Core(CoreError::PathResolution(_))) => {
                "err:db/PathResolution"
            }
            ServerError::Api(ApiError::Core(CoreError::Validation(_))) => {
                "err:db/ConstraintViolation"
            }
            ServerError::Api(ApiError::Core(_)) => "err:db/Invalid",
            ServerError::Api(ApiError::Store(StoreError::NotFound(_))) => "err:db/NotFound",
            ServerError::Api(ApiError::Store(StoreError::Search(_))) => "err:db/InvalidSearch",
            ServerError::Api(ApiError::Store(StoreError::BatchTimeout(_))) => "err:db/Timeout",
            ServerError::Api(ApiError::Store(_)) => "err:db/Storage",
            ServerError::Api(ApiError::Internal(_)) => "err:db/Internal",
            ServerError::Api(ApiError::Json(_)) => "err:db/Internal",
            ServerError::Json(_) => "err:db/JsonParse",
            ServerError::BadRequest(_) => "err:db/BadRequest",
            ServerError::Internal(_) => "err:db/Internal",
        }
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 404 - the missing identifier is named in the message
            ServerError::Api(ApiError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Api(ApiError::Store(StoreError::NotFound(_))) => StatusCode::NOT_FOUND,

            // 409 - edit-lock conflicts, distinct from not-found so clients
            // can offer a retry-after-release flow
            ServerError::Api(ApiError::Conflict(_)) => StatusCode::CONFLICT,

            // 400 - malformed input
            ServerError::Api(ApiError::BadRequest(_)) => StatusCode::BAD_REQUEST,
            ServerError::Api(ApiError::Core(CoreError::PathFormat(_))) => StatusCode::BAD_REQUEST,
            ServerError::Json(_) => StatusCode::BAD_REQUEST,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,

            // 422 - semantically invalid values
            ServerError::Api(ApiError::Core(CoreError::PathResolution(_))) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServerError::Api(ApiError::Core(CoreError::Validation(_))) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServerError::Api(ApiError::Core(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Api(ApiError::Store(StoreError::Search(_))) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            // 504 - a reconstruction batch exceeded its deadline
            ServerError::Api(ApiError::Store(StoreError::BatchTimeout(_))) => {
                StatusCode::GATEWAY_TIMEOUT
            }

            // 500 - server-side errors and catch-all
            ServerError::Api(ApiError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Api(ApiError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Api(ApiError::Json(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// HTTP status code
    pub status: u16,
    /// Stable error type tag
    #[serde(rename = "@type")]
    pub error_type: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
            status: status.as_u16(),
            error_type: self.error_type().to_string(),
        };
        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"{}","status":{},"@type":"{}"}}"#,
                self,
                status.as_u16(),
                self.error_type()
            )
        });
        (status, [("content-type", "application/json")], json).into_response()
    }
}

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
