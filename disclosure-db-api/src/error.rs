//! Error types for the Disclosure DB API

use disclosure_db_core::CoreError;
use disclosure_db_store::StoreError;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, ApiError>;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    /// Core model error (path grammar, coercion, validation)
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Store layer error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Submission, revision or addressed row absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Edit attempted against the advisory check-out lock
    #[error("{0}")]
    Conflict(String),

    /// Request is structurally valid but not applicable
    #[error("{0}")]
    BadRequest(String),

    /// Internal invariant broken
    #[error("internal error: {0}")]
    Internal(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError::Conflict(msg.into())
    }

    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::Internal(msg.into())
    }
}

/// Messages reused across the submission managers.
pub mod messages {
    pub const SUBMISSION_NOT_EMPTY: &str =
        "Submission cannot be updated because it is not empty.";
    pub const SUBMISSION_ALREADY_EXISTS: &str =
        "A submission already exists for this company and reporting year.";
    pub const SUBMISSION_CANT_EDIT: &str =
        "Could not edit the current submission: it is not checked out.";
    pub const SUBMISSION_CANT_CHECK_OUT: &str =
        "Could not perform request: submission is already checked out.";
    pub const SUBMISSION_CHECKED_OUT_BY_ANOTHER_USER: &str =
        "Could not clear edit mode for current submission: it has been checked out by another user.";
    pub const SUBMISSION_EMPTY_REVISION: &str =
        "Cannot create revision on an empty submission. Use update submission API or create a new submission.";
    pub const SUBMISSION_NO_PREVIOUS_ACTIVE: &str =
        "Previous active submission object not found.";
    pub const SUBMISSION_NO_ACTIVE: &str = "There is no active submission object found.";
}
