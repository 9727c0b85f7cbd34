use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Listing row for a stored session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    /// Unique identifier for the session
    pub id: String,
    /// Display title
    pub title: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session was last updated
    pub updated_at: DateTime<Utc>,
    /// The model used in the session
    pub model: String,
    /// Number of messages in the session
    pub message_count: usize,
}

/// Converts epoch milliseconds, clamping out-of-range values to the epoch
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
