//! Error types for my-feed.
//!
//! Every variant carries owned, cloneable data: a single settled fetch is
//! handed to all deduplicated callers and also stored as the entry's `error`.

use thiserror::Error;

/// Result type alias using `FeedError`.
pub type Result<T> = std::result::Result<T, FeedError>;

/// Main error type for all my-feed operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FeedError {
    // ═══════════════════════════════════════════════════════════════════════════
    // TRANSPORT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════
    /// HTTP request could not be sent or the response could not be read.
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Server answered with a non-2xx status.
    #[error("Bad response {status}: {body}")]
    BadStatus {
        /// HTTP status code
        status: u16,
        /// Raw response body (never parsed as the success payload)
        body: String,
    },

    /// Request exceeded its deadline.
    #[error("Request timed out: {0}")]
    Timeout(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // DECODE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════
    /// Response payload did not match the expected shape.
    #[error("Decode error: {0}")]
    DecodeError(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // KEY CODEC ERRORS
    // ═══════════════════════════════════════════════════════════════════════════
    /// A cache key string does not name a known resource.
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Unknown time-window selector.
    #[error("Invalid time window '{0}': expected one of 1d, 2d, 3d, 1w")]
    InvalidTimeWindow(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // AUTH ERRORS
    // ═══════════════════════════════════════════════════════════════════════════
    /// A write was attempted without a stored token.
    #[error("Not logged in: no auth token stored")]
    MissingToken,

    /// Server rejected the token.
    #[error("Unauthorized")]
    Unauthorized,

    // ═══════════════════════════════════════════════════════════════════════════
    // VALIDATION & CONFIGURATION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════
    /// Input validation failed.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Base URL or request path could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════
    /// Internal invariant violation (should never happen).
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl FeedError {
    /// Builds a `BadStatus` error from a status code and body text.
    pub fn bad_status(status: u16, body: impl Into<String>) -> Self {
        if status == 401 {
            return FeedError::Unauthorized;
        }
        FeedError::BadStatus {
            status,
            body: body.into(),
        }
    }

    /// Returns true if this error is recoverable (can retry).
    pub fn is_recoverable(&self) -> bool {
        match self {
            FeedError::HttpError(_) | FeedError::Timeout(_) => true,
            FeedError::BadStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the request never produced a usable response.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            FeedError::HttpError(_)
                | FeedError::BadStatus { .. }
                | FeedError::Timeout(_)
                | FeedError::Unauthorized
        )
    }

    /// Returns true if a response arrived but its payload was malformed.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, FeedError::DecodeError(_))
    }

    /// Returns true if the server reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedError::BadStatus { status: 404, .. })
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::DecodeError(err.to_string())
    }
}

impl From<url::ParseError> for FeedError {
    fn from(err: url::ParseError) -> Self {
        FeedError::InvalidUrl(err.to_string())
    }
}
