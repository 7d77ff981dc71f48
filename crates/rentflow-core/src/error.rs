//! Error types for rentflow-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using rentflow-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rentflow-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote data service error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Local referential integrity violation, raised before any queue or network activity
    #[error("{0}")]
    Integrity(String),

    /// Operation requires an authenticated session
    #[error("Not authenticated")]
    NotAuthenticated,
}
