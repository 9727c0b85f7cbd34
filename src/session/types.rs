use crate::attachment::Attachment;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest derived title, in characters, before the ellipsis
pub const TITLE_MAX_CHARS: usize = 40;

/// Title of a session that has no user message yet
pub const DEFAULT_TITLE: &str = "New chat";

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person chatting
    User,
    /// The model
    Assistant,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message in a session; immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier
    pub id: String,
    /// Author
    pub role: Role,
    /// Text content
    pub content: String,
    /// Creation time in epoch milliseconds, stamped on append
    pub created_at: i64,
    /// Model that produced (or was asked for) this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Character (persona) tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    /// Optional single attachment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl Message {
    /// Creates an unstamped message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: 0,
            model: None,
            character: None,
            attachment: None,
        }
    }

    /// Creates a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Sets the model tag
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the character tag
    pub fn with_character(mut self, character: Option<String>) -> Self {
        self.character = character;
        self
    }

    /// Attaches a processed file
    pub fn with_attachment(mut self, attachment: Option<Attachment>) -> Self {
        self.attachment = attachment;
        self
    }
}

/// A conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    /// Opaque identifier (UUID v4)
    pub id: String,
    /// Display title
    pub title: String,
    /// Messages in chronological order
    pub messages: Vec<Message>,
    /// Model the session was created for
    pub model: String,
    /// Creation time in epoch milliseconds
    pub created_at: i64,
    /// Last mutation time in epoch milliseconds
    pub updated_at: i64,
}

impl ChatSession {
    /// Short form of the id used in listings
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// First eight characters of an id, or the whole id when shorter
///
/// # Examples
///
/// ```
/// use charla::session::short_id;
///
/// assert_eq!(short_id("0123abcd-0000-4000-8000-000000000000"), "0123abcd");
/// assert_eq!(short_id("legacy"), "legacy");
/// ```
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Title derived from the first user message
///
/// # Examples
///
/// ```
/// use charla::session::derive_title;
///
/// assert_eq!(derive_title("Hola"), "Hola");
/// let long = "Explain quantum computing in simple terms for beginners please";
/// assert_eq!(derive_title(long), "Explain quantum computing in simple term...");
/// ```
pub fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    match trimmed.char_indices().nth(TITLE_MAX_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
