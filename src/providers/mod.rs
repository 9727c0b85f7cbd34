//! Chat proxy transport
//!
//! This module contains the wire types, the [`ChatBackend`] abstraction, the
//! reqwest implementation and the streamed-frame decoder.

pub mod base;
pub mod http;
pub mod sse;

pub use base::{
    ByteStream, ChatBackend, ChatRequest, Completion, ContentPart, ImageUrl, StreamError,
    TokenUsage, WireContent, WireMessage,
};
pub use http::HttpChatBackend;
pub use sse::{text_deltas, DeltaStream, Frame, FrameDecoder};
