//! Chat-completion wire types and the backend trait
//!
//! This module defines the request and response shapes exchanged with the
//! chat proxy and the [`ChatBackend`] trait every transport implements.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

/// Failure while consuming a streamed body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The caller asked to stop; not a failure
    #[error("stream cancelled")]
    Cancelled,

    /// The connection broke or returned unreadable data
    #[error("stream transport error: {0}")]
    Transport(String),
}

/// Raw response body as a stream of byte chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, StreamError>> + Send>>;

/// One part of a multimodal message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// Inline image as a data URI
    ImageUrl {
        /// Image location
        image_url: ImageUrl,
    },
}

/// Image reference inside a [`ContentPart::ImageUrl`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// `data:` URI carrying the image
    pub url: String,
}

/// Message content: plain text or a list of typed parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    /// Text-only turn
    Text(String),
    /// Multimodal turn
    Parts(Vec<ContentPart>),
}

/// Message as sent to the chat proxy
///
/// # Examples
///
/// ```
/// use charla::providers::WireMessage;
///
/// let msg = WireMessage::text("user", "Hola");
/// let json = serde_json::to_value(&msg).unwrap();
/// assert_eq!(json["role"], "user");
/// assert_eq!(json["content"], "Hola");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// `user` or `assistant`
    pub role: String,
    /// Message content
    pub content: WireContent,
}

impl WireMessage {
    /// Creates a text-only message
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: WireContent::Text(content.into()),
        }
    }

    /// Creates a message with text followed by one image
    pub fn with_image(
        role: impl Into<String>,
        text: impl Into<String>,
        data_uri: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            content: WireContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: data_uri.into(),
                    },
                },
            ]),
        }
    }
}

/// Body of a chat-completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Full ordered history including the new user turn
    pub messages: Vec<WireMessage>,
    /// Model identifier
    pub model: String,
    /// Character (persona) identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    /// Whether the response should be streamed
    pub stream: bool,
}

impl ChatRequest {
    /// Copy of this request with the streaming flag set
    pub fn with_stream(&self, stream: bool) -> Self {
        Self {
            stream,
            ..self.clone()
        }
    }
}

/// Token usage counters reported with a buffered response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: usize,
    /// Tokens in the completion
    #[serde(default)]
    pub completion_tokens: usize,
    /// Total tokens
    #[serde(default)]
    pub total_tokens: usize,
}

/// Buffered (non-streaming) completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Assistant text
    pub content: String,
    /// Usage counters, when reported
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionBody {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionChoice {
    pub message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Transport to the chat proxy
///
/// `open_stream` must fail (rather than return a stream) for any
/// non-success status so callers can fall back before reading.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Sends a streaming request and returns the raw body stream
    async fn open_stream(&self, request: &ChatRequest, token: &str) -> Result<ByteStream>;

    /// Sends a buffered request and returns the full completion
    async fn complete(&self, request: &ChatRequest, token: &str) -> Result<Completion>;
}
