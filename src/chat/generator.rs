//! Generation of one assistant reply
//!
//! ```text
//! Idle -> Requesting -> Streaming -> Completed | Cancelled | Failed
//!            |               |
//!            |               +-- transport error --+
//!            +-- open error -----------------------+--> buffered fallback
//!                                                       -> Completed | Cancelled | Failed
//! ```
//!
//! The fallback is a single non-streaming request. Cancellation discards any
//! partial text.

use crate::auth::TokenSource;
use crate::error::{CharlaError, Result};
use crate::providers::{text_deltas, ChatBackend, ChatRequest, StreamError, TokenUsage};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    /// Nothing sent yet
    Idle,
    /// Request in flight, nothing received
    Requesting,
    /// Receiving deltas
    Streaming,
    /// Reply received in full
    Completed,
    /// Stopped by the caller
    Cancelled,
    /// Stream and fallback both failed
    Failed,
}

impl GenerationState {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether moving to `next` is allowed
    ///
    /// `Streaming -> Requesting` is the fallback after a broken stream.
    pub fn can_transition_to(self, next: GenerationState) -> bool {
        use GenerationState::*;
        matches!(
            (self, next),
            (Idle, Requesting)
                | (Requesting, Streaming)
                | (Requesting, Completed)
                | (Requesting, Cancelled)
                | (Requesting, Failed)
                | (Streaming, Requesting)
                | (Streaming, Completed)
                | (Streaming, Cancelled)
                | (Streaming, Failed)
        )
    }
}

/// Progress notifications emitted while generating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// The state machine moved
    StateChanged(GenerationState),
    /// A chunk of assistant text, in order
    Delta(String),
    /// The stream was abandoned; a buffered request follows
    FallbackStarted,
}

/// How a generation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Full reply text
    Completed {
        /// Assistant text
        text: String,
        /// Whether the text arrived through the stream
        streamed: bool,
        /// Usage counters from a buffered reply
        usage: Option<TokenUsage>,
    },
    /// Stopped by the caller; nothing to keep
    Cancelled,
    /// Both attempts failed
    Failed(String),
}

struct Tracker {
    state: GenerationState,
}

impl Tracker {
    fn advance(
        &mut self,
        next: GenerationState,
        on_event: &mut dyn FnMut(GenerationEvent),
    ) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(CharlaError::Stream(format!(
                "illegal generation transition {:?} -> {:?}",
                self.state, next
            ))
            .into());
        }
        tracing::debug!("Generation state {:?} -> {:?}", self.state, next);
        self.state = next;
        on_event(GenerationEvent::StateChanged(next));
        Ok(())
    }
}

/// Runs one request against a backend
pub struct Generator<'a> {
    backend: &'a dyn ChatBackend,
    tokens: &'a dyn TokenSource,
    streaming: bool,
}

impl<'a> Generator<'a> {
    /// Creates a generator
    ///
    /// With `streaming` off only the buffered request is made.
    pub fn new(backend: &'a dyn ChatBackend, tokens: &'a dyn TokenSource, streaming: bool) -> Self {
        Self {
            backend,
            tokens,
            streaming,
        }
    }

    /// Generates a reply
    ///
    /// # Errors
    ///
    /// Returns `CharlaError::LoginRequired` when no live token is available;
    /// no request is sent in that case. Network and proxy failures are
    /// reported as [`GenerationOutcome::Failed`], not as errors.
    pub async fn run(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        on_event: &mut dyn FnMut(GenerationEvent),
    ) -> Result<GenerationOutcome> {
        let mut tracker = Tracker {
            state: GenerationState::Idle,
        };

        let token = self.tokens.access_token().await?;
        tracker.advance(GenerationState::Requesting, on_event)?;

        if self.streaming {
            match self.stream(request, &token, cancel, &mut tracker, on_event).await? {
                Some(outcome) => return Ok(outcome),
                None => {
                    if tracker.state == GenerationState::Streaming {
                        tracker.advance(GenerationState::Requesting, on_event)?;
                    }
                    on_event(GenerationEvent::FallbackStarted);
                }
            }
        }

        self.buffered(request, cancel, &mut tracker, on_event).await
    }

    /// Streams a reply; `None` means fall back
    async fn stream(
        &self,
        request: &ChatRequest,
        token: &str,
        cancel: &CancellationToken,
        tracker: &mut Tracker,
        on_event: &mut dyn FnMut(GenerationEvent),
    ) -> Result<Option<GenerationOutcome>> {
        let streaming_request = request.with_stream(true);
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracker.advance(GenerationState::Cancelled, on_event)?;
                return Ok(Some(GenerationOutcome::Cancelled));
            }
            opened = self.backend.open_stream(&streaming_request, token) => opened,
        };

        let body = match opened {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Streaming request failed, falling back: {}", e);
                return Ok(None);
            }
        };

        tracker.advance(GenerationState::Streaming, on_event)?;
        let mut deltas = text_deltas(body, cancel.clone());
        let mut text = String::new();

        while let Some(item) = deltas.next().await {
            match item {
                Ok(delta) => {
                    text.push_str(&delta);
                    on_event(GenerationEvent::Delta(delta));
                }
                Err(StreamError::Cancelled) => {
                    tracing::info!(
                        "Generation cancelled, discarding {} partial characters",
                        text.chars().count()
                    );
                    tracker.advance(GenerationState::Cancelled, on_event)?;
                    return Ok(Some(GenerationOutcome::Cancelled));
                }
                Err(StreamError::Transport(e)) => {
                    tracing::warn!(
                        "Stream broke after {} characters, falling back: {}",
                        text.chars().count(),
                        e
                    );
                    return Ok(None);
                }
            }
        }

        tracker.advance(GenerationState::Completed, on_event)?;
        Ok(Some(GenerationOutcome::Completed {
            text,
            streamed: true,
            usage: None,
        }))
    }

    async fn buffered(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        tracker: &mut Tracker,
        on_event: &mut dyn FnMut(GenerationEvent),
    ) -> Result<GenerationOutcome> {
        // The stream may have run long enough for the token to age.
        let token = match self.tokens.access_token().await {
            Ok(token) => token,
            Err(e) => {
                tracker.advance(GenerationState::Failed, on_event)?;
                return Ok(GenerationOutcome::Failed(e.to_string()));
            }
        };

        let buffered_request = request.with_stream(false);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.backend.complete(&buffered_request, &token) => Some(result),
        };

        match result {
            None => {
                tracker.advance(GenerationState::Cancelled, on_event)?;
                Ok(GenerationOutcome::Cancelled)
            }
            Some(Ok(completion)) => {
                tracker.advance(GenerationState::Completed, on_event)?;
                Ok(GenerationOutcome::Completed {
                    text: completion.content,
                    streamed: false,
                    usage: completion.usage,
                })
            }
            Some(Err(e)) => {
                tracing::error!("Buffered request failed: {}", e);
                tracker.advance(GenerationState::Failed, on_event)?;
                Ok(GenerationOutcome::Failed(e.to_string()))
            }
        }
    }
}
