//! Error types for social-graph documents.

use thiserror::Error;

/// Errors that can occur while handling social-graph documents.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Document payload could not be decoded.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for social-graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;
