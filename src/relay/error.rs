//! Error types for relay operations.
//!
//! This module defines error types that can occur during relay
//! communication, subscription routing and event publishing.

use thiserror::Error;

use crate::graph::GraphError;

/// Errors that can occur during relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Connection to relay failed.
    #[error("Failed to connect to relay {url}: {reason}")]
    Connection {
        /// The relay URL that failed.
        url: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Event publishing failed.
    #[error("Failed to publish event: {0}")]
    Publish(String),

    /// Invalid relay URL.
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),

    /// Subscription failed.
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// All relays failed.
    #[error("All relays failed to accept the event")]
    AllRelaysFailed,

    /// No write-capable relay is connected.
    #[error("No write relays connected")]
    NoWriteRelays,

    /// A relay message could not be decoded.
    #[error("Malformed relay message: {0}")]
    MalformedMessage(String),

    /// A relay message type this client does not route.
    #[error("Unsupported relay message type: {0}")]
    UnsupportedMessage(String),

    /// The message payload is not a valid document.
    #[error("Invalid document in relay message: {0}")]
    Document(#[from] GraphError),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
