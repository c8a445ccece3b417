//! Error types for disclosure-db-store

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store error type
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error from sqlx
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A fetch batch exceeded its deadline
    #[error("fetch batch timed out after {0:?}")]
    BatchTimeout(std::time::Duration),

    /// Fetched cell could not be decoded as its declared type
    #[error("cell decode error in table '{table}', column '{column}': {message}")]
    Decode {
        table: String,
        column: String,
        message: String,
    },

    /// Core model error
    #[error(transparent)]
    Core(#[from] disclosure_db_core::CoreError),

    /// Invalid search request
    #[error("invalid search request: {0}")]
    Search(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        StoreError::NotFound(msg.into())
    }

    /// Create a search error
    pub fn search(msg: impl Into<String>) -> Self {
        StoreError::Search(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        StoreError::Other(msg.into())
    }
}
