//! Error types for disclosure-db-core

use crate::constraint::Violations;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    /// Referenced definition, submission or row is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attribute path string does not match the grammar
    #[error("Malformed attribute path: {0}")]
    PathFormat(String),

    /// Attribute path does not resolve against the value tree
    #[error("Path resolution failed: {0}")]
    PathResolution(String),

    /// Type coercion error
    #[error("Type coercion error: {0}")]
    Coercion(#[from] crate::coerce::CoercionError),

    /// Field-level constraint violations, collected per submission
    #[error("{0}")]
    Validation(Violations),

    /// Multiple/form conversion error
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    /// Create a malformed-path error
    pub fn path_format(msg: impl Into<String>) -> Self {
        CoreError::PathFormat(msg.into())
    }

    /// Create a path-resolution error
    pub fn path_resolution(msg: impl Into<String>) -> Self {
        CoreError::PathResolution(msg.into())
    }

    /// Create a conversion error
    pub fn conversion(msg: impl Into<String>) -> Self {
        CoreError::Conversion(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        CoreError::Other(msg.into())
    }
}
