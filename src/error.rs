//! Error types for the token broker

use std::io;

use thiserror::Error;

/// Result type alias for the token broker
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of characters of a provider response body kept for diagnostics
pub const BODY_EXCERPT_CHARS: usize = 500;

/// Token broker errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credentials required by the active identity mode are missing
    #[error("Authentication not configured: {0}")]
    AuthNotConfigured(String),

    /// Network failure or timeout talking to the identity provider or storage
    #[error("Transport error: {0}")]
    Transport(String),

    /// The identity provider rejected a grant
    #[error("Token exchange failed: HTTP {status} - {body}")]
    TokenExchangeFailed {
        /// HTTP status returned by the token endpoint
        status: u16,
        /// Truncated response body
        body: String,
    },

    /// Callback `state` did not match the outstanding nonce
    #[error("State mismatch - possible CSRF attack")]
    CsrfRejected,

    /// A human has to sign in at `auth_url` before a delegated token exists
    #[error("Interactive authorization required: visit {auth_url}")]
    InteractiveAuthRequired {
        /// Login URL to surface verbatim to the user
        auth_url: String,
    },

    /// Durable token storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A caller-supplied deadline elapsed
    #[error("Timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a [`Error::TokenExchangeFailed`], truncating the body
    pub fn exchange_failed(status: u16, body: &str) -> Self {
        Self::TokenExchangeFailed {
            status,
            body: excerpt(body),
        }
    }

    /// Whether a caller may retry the same request with backoff
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Whether the provider rejected the grant (as opposed to a transport failure)
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::TokenExchangeFailed { .. })
    }
}

/// Truncate a response body to [`BODY_EXCERPT_CHARS`] characters
#[must_use]
pub fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
