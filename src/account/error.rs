//! Error types for account operations.
//!
//! This module defines errors returned by store actions, by account
//! persistence and by the signing agent.

use thiserror::Error;

use crate::relay::RelayError;

/// Error type for account actions.
#[derive(Error, Debug)]
pub enum AccountError {
    /// The action needs an identity and the session is anonymous.
    #[error("No identity is set")]
    Anonymous,

    /// A relay operation failed.
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// The fetch-before-write query could not be sent.
    #[error("Query failed: {0}")]
    Query(String),

    /// Every attempt to publish the edit lost to a newer document that
    /// arrived while it was being sent.
    #[error("Edit superseded by newer documents")]
    Superseded,

    /// The edit was dropped before it resolved (identity change or store
    /// shutdown).
    #[error("Edit abandoned")]
    Abandoned,

    /// Account persistence failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for account actions.
pub type AccountResult<T> = std::result::Result<T, AccountError>;

/// Error type for account persistence.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database error from `SQLite`.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored data could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for account persistence.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Error type for the signing agent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The agent is not available (yet).
    #[error("Signing agent unavailable")]
    Unavailable,

    /// The agent refused to reveal the key.
    #[error("Signing agent rejected the request: {0}")]
    Rejected(String),
}
