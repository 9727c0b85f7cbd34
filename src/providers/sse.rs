//! Streamed response decoding
//!
//! The chat proxy streams newline-delimited frames:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hola"}}]}
//! data: [DONE]
//! ```
//!
//! [`FrameDecoder`] buffers raw bytes and only decodes complete lines, so a
//! multi-byte character split across two network chunks is reassembled
//! before decoding (a `\n` byte never occurs inside a UTF-8 sequence).
//! [`text_deltas`] wraps a body stream into an ordered, cancellable stream of
//! text deltas.

use crate::providers::base::{ByteStream, StreamError};
use bytes::BytesMut;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Prefix of every payload-carrying line
const DATA_PREFIX: &str = "data: ";

/// Terminal sentinel payload
const DONE_SENTINEL: &str = "[DONE]";

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Incremental assistant text
    Delta(String),
    /// End of the response
    Done,
}

/// Parses one complete line
///
/// Returns `None` for non-data lines, malformed JSON, and frames without a
/// (non-empty) `choices[0].delta.content` string.
///
/// # Examples
///
/// ```
/// use charla::providers::sse::{parse_line, Frame};
///
/// let frame = parse_line(br#"data: {"choices":[{"delta":{"content":"Hola"}}]}"#);
/// assert_eq!(frame, Some(Frame::Delta("Hola".to_string())));
/// assert_eq!(parse_line(b"data: [DONE]"), Some(Frame::Done));
/// assert_eq!(parse_line(b"data: {not json"), None);
/// ```
pub fn parse_line(line: &[u8]) -> Option<Frame> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches('\r');
    let payload = line.strip_prefix(DATA_PREFIX)?;

    if payload.trim() == DONE_SENTINEL {
        return Some(Frame::Done);
    }

    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => value
            .pointer("/choices/0/delta/content")
            .and_then(|content| content.as_str())
            .filter(|content| !content.is_empty())
            .map(|content| Frame::Delta(content.to_string())),
        Err(e) => {
            tracing::debug!("Skipping malformed frame: {}", e);
            None
        }
    }
}

/// Incremental line splitter for a streamed body
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    done: bool,
}

impl FrameDecoder {
    /// Creates an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal sentinel has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds a chunk and returns the frames completed by it
    ///
    /// The trailing partial line stays buffered. Nothing is returned after
    /// [`Frame::Done`].
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }

        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            match parse_line(&line[..pos]) {
                Some(Frame::Done) => {
                    self.done = true;
                    self.buffer.clear();
                    frames.push(Frame::Done);
                    break;
                }
                Some(frame) => frames.push(frame),
                None => {}
            }
        }
        frames
    }

    /// Parses whatever is left once the body ends without a final newline
    pub fn finish(&mut self) -> Option<Frame> {
        if self.done || self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        let frame = parse_line(&rest);
        if frame == Some(Frame::Done) {
            self.done = true;
        }
        frame
    }
}

/// Ordered stream of text deltas
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, StreamError>> + Send>>;

struct DeltaState {
    body: ByteStream,
    decoder: FrameDecoder,
    pending: VecDeque<Result<String, StreamError>>,
    cancel: CancellationToken,
    finished: bool,
    cancel_reported: bool,
}

/// Turns a response body into a stream of text deltas
///
/// - deltas are yielded in byte-stream order;
/// - the stream ends after `[DONE]` (the body is not read further) or when
///   the body ends;
/// - once `cancel` fires, a single `Err(StreamError::Cancelled)` is yielded
///   and the stream ends, even while a read is pending;
/// - a read error is yielded as `Err(StreamError::Transport)` and ends the
///   stream.
pub fn text_deltas(body: ByteStream, cancel: CancellationToken) -> DeltaStream {
    let state = DeltaState {
        body,
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
        cancel,
        finished: false,
        cancel_reported: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if !state.cancel_reported && state.cancel.is_cancelled() {
                state.cancel_reported = true;
                state.finished = true;
                state.pending.clear();
                tracing::debug!("Stream cancelled by caller");
                return Some((Err(StreamError::Cancelled), state));
            }

            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }

            if state.finished {
                return None;
            }

            let next = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => None,
                chunk = state.body.next() => Some(chunk),
            };
            let Some(next) = next else {
                continue;
            };

            match next {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.feed(&chunk) {
                        match frame {
                            Frame::Delta(text) => state.pending.push_back(Ok(text)),
                            Frame::Done => {
                                tracing::debug!("Received end-of-stream sentinel");
                                state.finished = true;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.push_back(Err(e));
                }
                None => {
                    state.finished = true;
                    if let Some(Frame::Delta(text)) = state.decoder.finish() {
                        state.pending.push_back(Ok(text));
                    }
                }
            }
        }
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    fn body_from(chunks: Vec<Vec<u8>>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from(c))),
        ))
    }

    async fn collect(body: ByteStream) -> Vec<Result<String, StreamError>> {
        text_deltas(body, CancellationToken::new()).collect().await
    }

    fn sample_body() -> Vec<u8> {
        let mut body = String::new();
        body.push_str(&frame("Hola"));
        body.push_str(&frame("mun"));
        body.push_str(&frame("do"));
        body.push_str("data: [DONE]\n\n");
        body.into_bytes()
    }

    #[test]
    fn test_decoder_holds_partial_line() {
        let mut decoder = FrameDecoder::new();
        let line = frame("Hola");
        let (a, b) = line.as_bytes().split_at(10);
        assert!(decoder.feed(a).is_empty());
        assert_eq!(decoder.feed(b), vec![Frame::Delta("Hola".to_string())]);
    }

    #[test]
    fn test_decoder_split_codepoint() {
        let mut decoder = FrameDecoder::new();
        let line = frame("año ☃");
        let bytes = line.as_bytes();
        let snowman = bytes.iter().position(|&b| b == 0xE2).unwrap();
        assert!(decoder.feed(&bytes[..snowman + 1]).is_empty());
        assert_eq!(
            decoder.feed(&bytes[snowman + 1..]),
            vec![Frame::Delta("año ☃".to_string())]
        );
    }

    #[test]
    fn test_decoder_ignores_after_done() {
        let mut decoder = FrameDecoder::new();
        let mut body = frame("a").into_bytes();
        body.extend_from_slice(b"data: [DONE]\n");
        body.extend_from_slice(frame("late").as_bytes());
        assert_eq!(
            decoder.feed(&body),
            vec![Frame::Delta("a".to_string()), Frame::Done]
        );
        assert!(decoder.is_done());
        assert!(decoder.feed(frame("later").as_bytes()).is_empty());
    }

    #[test]
    fn test_decoder_crlf_lines() {
        let mut decoder = FrameDecoder::new();
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r\ndata: [DONE]\r\n";
        assert_eq!(
            decoder.feed(body.as_bytes()),
            vec![Frame::Delta("x".to_string()), Frame::Done]
        );
    }

    #[test]
    fn test_decoder_skips_non_data_lines() {
        let mut decoder = FrameDecoder::new();
        let body = ": keep-alive\nevent: message\nid: 7\n";
        assert!(decoder.feed(body.as_bytes()).is_empty());
    }

    #[test]
    fn test_decoder_finish_flushes_unterminated_line() {
        let mut decoder = FrameDecoder::new();
        let line = frame("tail");
        assert!(decoder.feed(line.trim_end().as_bytes()).is_empty());
        assert_eq!(decoder.finish(), Some(Frame::Delta("tail".to_string())));
    }

    #[test]
    fn test_parse_line_missing_content() {
        assert_eq!(parse_line(br#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#), None);
        assert_eq!(parse_line(br#"data: {"choices":[]}"#), None);
        assert_eq!(parse_line(br#"data: {"choices":[{"delta":{"content":""}}]}"#), None);
    }

    #[tokio::test]
    async fn test_deltas_every_split_point() {
        let body = sample_body();
        for split in 1..body.len() {
            let chunks = vec![body[..split].to_vec(), body[split..].to_vec()];
            let deltas: Vec<String> = collect(body_from(chunks))
                .await
                .into_iter()
                .map(|r| r.unwrap())
                .collect();
            assert_eq!(deltas, vec!["Hola", "mun", "do"], "split at {}", split);
        }
    }

    #[tokio::test]
    async fn test_deltas_byte_at_a_time_with_multibyte() {
        let mut body = String::new();
        body.push_str(&frame("¡Hola"));
        body.push_str(&frame(" 世界"));
        body.push_str("data: [DONE]\n");
        let chunks = body.as_bytes().iter().map(|b| vec![*b]).collect();

        let deltas: Vec<String> = collect(body_from(chunks))
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(deltas, vec!["¡Hola", " 世界"]);
    }

    #[tokio::test]
    async fn test_malformed_frame_between_valid_frames() {
        let mut body = frame("uno");
        body.push_str("data: {not json\n\n");
        body.push_str(&frame("dos"));
        body.push_str("data: [DONE]\n\n");

        let deltas: Vec<String> = collect(body_from(vec![body.into_bytes()]))
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(deltas, vec!["uno", "dos"]);
    }

    #[tokio::test]
    async fn test_stops_reading_after_done() {
        let mut first = frame("a").into_bytes();
        first.extend_from_slice(b"data: [DONE]\n");
        let body: ByteStream = Box::pin(
            futures::stream::iter(vec![Ok(Bytes::from(first))])
                .chain(futures::stream::pending()),
        );

        let deltas = tokio::time::timeout(std::time::Duration::from_secs(1), collect(body))
            .await
            .expect("stream must end at [DONE] without reading further");
        assert_eq!(deltas, vec![Ok("a".to_string())]);
    }

    #[tokio::test]
    async fn test_body_end_without_done_completes() {
        let body = frame("solo").into_bytes();
        let deltas = collect(body_from(vec![body])).await;
        assert_eq!(deltas, vec![Ok("solo".to_string())]);
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let body: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from(frame("parcial"))),
            Err(StreamError::Transport("connection reset".to_string())),
        ]));
        let items = collect(body).await;
        assert_eq!(
            items,
            vec![
                Ok("parcial".to_string()),
                Err(StreamError::Transport("connection reset".to_string()))
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_while_read_pending() {
        let body: ByteStream = Box::pin(
            futures::stream::iter(vec![Ok(Bytes::from(frame("antes")))])
                .chain(futures::stream::pending()),
        );
        let cancel = CancellationToken::new();
        let mut deltas = text_deltas(body, cancel.clone());

        assert_eq!(deltas.next().await, Some(Ok("antes".to_string())));
        cancel.cancel();
        assert_eq!(deltas.next().await, Some(Err(StreamError::Cancelled)));
        assert_eq!(deltas.next().await, None);
    }
}
