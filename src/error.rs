//! Error types for Charla
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

use crate::attachment::Rejection;

/// Main error type for Charla operations
///
/// This enum encompasses the failures that can occur while gating,
/// preparing, sending and persisting chat messages.
#[derive(Error, Debug)]
pub enum CharlaError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The local free-tier quota is used up for today
    #[error("Daily message limit reached: used={used}, limit={limit}")]
    QuotaExceeded {
        /// Messages already sent today
        used: u32,
        /// Effective free limit (daily limit plus bonus allowance)
        limit: u32,
    },

    /// An uploaded file was refused before any network call
    #[error("Attachment rejected: {0}")]
    AttachmentRejected(#[from] Rejection),

    /// Message has no content after trimming
    #[error("Message is empty")]
    EmptyMessage,

    /// Message exceeds the configured character limit
    #[error("Message too long: {len} characters (limit {limit})")]
    MessageTooLong {
        /// Character count of the rejected message
        len: usize,
        /// Configured limit
        limit: usize,
    },

    /// No usable credentials; the user has to log in again
    #[error("Login required: {0}")]
    LoginRequired(String),

    /// Chat proxy errors (HTTP status, unexpected body)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Errors while reading a streamed response
    #[error("Stream error: {0}")]
    Stream(String),

    /// Session lookup failed
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// An id or prefix that cannot name exactly one stored session
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// Checkout creation failed
    #[error("Checkout error: {0}")]
    Checkout(String),

    /// Local state or history storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Charla operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation. Callers that
/// need the category downcast to [`CharlaError`].
pub type Result<T> = anyhow::Result<T>;
