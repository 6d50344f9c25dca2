//! Error handling module
//!
//! Provides unified error types for branch management, schema diffing and
//! the export/import engines.

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The adapter failed while cloning a branch. The target namespace may
    /// be partially created.
    #[error("Failed to clone schema for branch '{branch}': {message}")]
    CloneFailure { branch: String, message: String },

    /// Dropping a branch namespace failed; the branch stays in metadata.
    #[error("Failed to drop schema for branch '{branch}': {message}")]
    DropFailure { branch: String, message: String },

    #[error("Constraint failure: {0}")]
    ConstraintFailure(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Unsupported by adapter: {0}")]
    AdapterUnsupported(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True when the failure means the object being created is already there.
    pub fn is_already_exists(&self) -> bool {
        match self {
            AppError::Database(e) => matches!(
                e.code(),
                Some(code) if *code == SqlState::DUPLICATE_OBJECT
                    || *code == SqlState::DUPLICATE_TABLE
                    || *code == SqlState::DUPLICATE_COLUMN
            ),
            AppError::Conflict(msg) => msg.contains("already exists"),
            _ => false,
        }
    }

    /// Session deadline expiry aborts a whole export or import
    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Timeout(_))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(e: crate::config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// Result type alias used across the crate
pub type AppResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}

/// Helper function to create a conflict error
pub fn conflict_error(msg: impl Into<String>) -> AppError {
    AppError::Conflict(msg.into())
}
