//! Test utilities for Charla
//!
//! Temporary files, error assertions, a default configuration and a scripted
//! in-process chat backend.

use crate::config::Config;
use crate::error::{CharlaError, Result};
use crate::providers::{ByteStream, ChatBackend, ChatRequest, Completion, StreamError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Create a test file with the given bytes
pub fn create_test_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T>(result: Result<T>, expected: &str) {
    match result {
        Ok(_) => panic!("Expected error containing '{}' but got Ok", expected),
        Err(e) => {
            let error_msg = e.to_string();
            assert!(
                error_msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                error_msg,
                expected
            );
        }
    }
}

/// Create a test configuration with default values
pub fn test_config() -> Config {
    Config::default()
}

/// Streamed body with one frame per delta and the terminal sentinel
pub fn sse_body(deltas: &[&str]) -> Vec<u8> {
    let mut body = sse_frames(deltas);
    body.extend_from_slice(b"data: [DONE]\n\n");
    body
}

/// Delta frames only, as seen before a connection drops
pub fn sse_frames(deltas: &[&str]) -> Vec<u8> {
    let mut body = String::new();
    for delta in deltas {
        body.push_str(&format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": delta}}]})
        ));
    }
    body.into_bytes()
}

/// What [`ScriptedBackend::open_stream`] does
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// Returns the body in one chunk
    Body(Vec<u8>),
    /// Fails before returning a stream
    OpenError,
    /// Returns the bytes, then a transport error
    BreakAfter(Vec<u8>),
    /// Returns the bytes, then never yields again
    Hang(Vec<u8>),
}

/// In-process backend with canned behavior and call counters
pub struct ScriptedBackend {
    stream: StreamScript,
    buffered: Option<std::result::Result<String, String>>,
    stream_calls: AtomicUsize,
    buffered_calls: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
}

impl ScriptedBackend {
    /// Creates a backend; `buffered: None` makes `complete` fail
    pub fn new(stream: StreamScript, buffered: Option<std::result::Result<String, String>>) -> Self {
        Self {
            stream,
            buffered,
            stream_calls: AtomicUsize::new(0),
            buffered_calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Number of `open_stream` calls
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Number of `complete` calls
    pub fn buffered_calls(&self) -> usize {
        self.buffered_calls.load(Ordering::SeqCst)
    }

    /// The most recent request seen by either call
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

fn chunk(bytes: &[u8]) -> futures::stream::Iter<std::vec::IntoIter<std::result::Result<Bytes, StreamError>>> {
    futures::stream::iter(vec![Ok(Bytes::copy_from_slice(bytes))])
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn open_stream(&self, request: &ChatRequest, _token: &str) -> Result<ByteStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());

        let stream: ByteStream = match &self.stream {
            StreamScript::Body(bytes) => Box::pin(chunk(bytes)),
            StreamScript::OpenError => {
                return Err(CharlaError::Provider("chat proxy returned 503".to_string()).into())
            }
            StreamScript::BreakAfter(bytes) => Box::pin(chunk(bytes).chain(futures::stream::iter(
                vec![Err(StreamError::Transport("connection reset".to_string()))],
            ))),
            StreamScript::Hang(bytes) => Box::pin(chunk(bytes).chain(futures::stream::pending())),
        };
        Ok(stream)
    }

    async fn complete(&self, request: &ChatRequest, _token: &str) -> Result<Completion> {
        self.buffered_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());

        match &self.buffered {
            Some(Ok(content)) => Ok(Completion {
                content: content.clone(),
                usage: None,
            }),
            Some(Err(reason)) => Err(CharlaError::Provider(reason.clone()).into()),
            None => Err(CharlaError::Provider("no buffered reply scripted".to_string()).into()),
        }
    }
}

/// Lets a test keep a handle on the backend it hands to a service
#[async_trait]
impl ChatBackend for Arc<ScriptedBackend> {
    async fn open_stream(&self, request: &ChatRequest, token: &str) -> Result<ByteStream> {
        self.as_ref().open_stream(request, token).await
    }

    async fn complete(&self, request: &ChatRequest, token: &str) -> Result<Completion> {
        self.as_ref().complete(request, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_dir_creation() {
        let dir = temp_dir();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_create_test_file() {
        let dir = temp_dir();
        let path = create_test_file(&dir, "test.bin", b"content");
        assert_eq!(std::fs::read(&path).unwrap(), b"content");
    }

    #[test]
    fn test_assert_error_contains_success() {
        let result: Result<()> = Err(CharlaError::Config("test error message".to_string()).into());
        assert_error_contains(result, "test error");
    }

    #[test]
    #[should_panic(expected = "Expected error containing")]
    fn test_assert_error_contains_ok() {
        assert_error_contains(Ok(()), "error");
    }

    #[test]
    fn test_test_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_sse_body_ends_with_sentinel() {
        let body = String::from_utf8(sse_body(&["a"])).unwrap();
        assert!(body.starts_with("data: "));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }
}
