//! Error types for the database API client.

use thiserror::Error;

/// Errors that can occur when using the database API client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed (connect, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned a non-success status.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        message: String,
    },

    /// Failed to deserialize a response body.
    #[error("Failed to deserialize response: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Response decoded but is missing something the client requires.
    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    /// TLS configuration could not be applied.
    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl ClientError {
    /// Whether the server answered 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Api { status: 404, .. })
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
