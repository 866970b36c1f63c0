//! Error types for the feed synchronization core
//!
//! This module defines all error types used throughout the crate.
//!
//! The error is `Clone`: a coalesced batch of like toggles resolves every
//! waiting caller with the same outcome. Foreign errors (I/O, JSON) are
//! therefore captured as messages.

use thiserror::Error;

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the feed synchronization core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The post does not exist (or no longer exists)
    #[error("Not found: {0}")]
    NotFound(String),

    /// No valid identity is available
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// A toggle did not reach Confirmed or Rejected within the bounded interval
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Out-of-order commit observed while holding the per-post lock.
    ///
    /// Seeing this means per-post serialization is broken somewhere.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input (empty ids, bad arguments)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Caller is authenticated but not allowed to perform the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The subscription was terminated; re-subscribe for a fresh snapshot
    #[error("Subscription lost: {0}")]
    SubscriptionLost(String),

    /// Post store collaborator errors
    #[error("Post store error: {0}")]
    PostStore(String),

    /// Like cache persistence errors
    #[error("Like cache store error: {0}")]
    CacheStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an unauthenticated error
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a permission error
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a subscription-lost error
    pub fn subscription_lost(msg: impl Into<String>) -> Self {
        Self::SubscriptionLost(msg.into())
    }

    /// Create a post store error
    pub fn post_store(msg: impl Into<String>) -> Self {
        Self::PostStore(msg.into())
    }

    /// Create a like cache store error
    pub fn cache_store(msg: impl Into<String>) -> Self {
        Self::CacheStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the caller may retry the same operation and expect progress
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::SubscriptionLost(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
