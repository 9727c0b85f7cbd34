//! HTTP transport to the chat proxy
//!
//! Posts chat requests to `{base_url}{chat_path}` with a bearer token. The
//! proxy attaches the vendor key and forwards to the model API, so this
//! client only speaks the OpenAI-style completion shape.

use crate::config::ApiConfig;
use crate::error::{CharlaError, Result};
use crate::providers::base::{
    ByteStream, ChatBackend, ChatRequest, Completion, CompletionBody, StreamError,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;

/// Chat backend over reqwest
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

fn format_proxy_error(status: reqwest::StatusCode, body: &str) -> CharlaError {
    match status {
        reqwest::StatusCode::UNAUTHORIZED => CharlaError::LoginRequired(format!(
            "chat proxy returned {}: {}",
            status, body
        )),
        reqwest::StatusCode::TOO_MANY_REQUESTS => CharlaError::Provider(format!(
            "chat proxy rate limited the request ({}): {}",
            status, body
        )),
        _ => CharlaError::Provider(format!("chat proxy returned {}: {}", status, body)),
    }
}

impl HttpChatBackend {
    /// Create a backend for the configured proxy
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    ///
    /// # Examples
    ///
    /// ```
    /// use charla::config::ApiConfig;
    /// use charla::providers::HttpChatBackend;
    ///
    /// let backend = HttpChatBackend::new(&ApiConfig::default());
    /// assert!(backend.is_ok());
    /// ```
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        // No client-wide total timeout: it would cut long streamed replies.
        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("charla/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CharlaError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        let endpoint = format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            config.chat_path
        );
        tracing::debug!("Initialized chat backend: endpoint={}", endpoint);

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// Full URL requests are posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn timed_out(&self) -> CharlaError {
        tracing::error!("Chat request timed out after {:?}", self.timeout);
        CharlaError::Provider(format!(
            "Chat request timed out after {}s",
            self.timeout.as_secs()
        ))
    }

    /// Posts the request and waits for a success status
    ///
    /// Only the wait for response headers is bounded here; reading the body
    /// is up to the caller.
    async fn post(&self, request: &ChatRequest, token: &str) -> Result<reqwest::Response> {
        tracing::debug!(
            "Sending chat request: {} messages, model={}, stream={}",
            request.messages.len(),
            request.model,
            request.stream
        );

        let send = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(request)
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| {
                tracing::error!("Chat request failed: {}", e);
                CharlaError::Provider(format!("Chat request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Chat proxy returned error {}: {}", status, error_text);
            return Err(format_proxy_error(status, &error_text).into());
        }

        Ok(response)
    }
}

/// Ends a body stream with a transport error when no chunk arrives in `idle`
fn with_idle_timeout(body: ByteStream, idle: Duration) -> ByteStream {
    Box::pin(futures::stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(item)) => Some((item, Some(body))),
            Ok(None) => None,
            Err(_) => {
                tracing::warn!("Chat stream idle for {:?}, giving up", idle);
                Some((
                    Err(StreamError::Transport(format!(
                        "no data received for {:?}",
                        idle
                    ))),
                    None,
                ))
            }
        }
    }))
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn open_stream(&self, request: &ChatRequest, token: &str) -> Result<ByteStream> {
        let response = self.post(request, token).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::Transport(e.to_string())));
        Ok(with_idle_timeout(Box::pin(body), self.timeout))
    }

    async fn complete(&self, request: &ChatRequest, token: &str) -> Result<Completion> {
        let exchange = async {
            let response = self.post(request, token).await?;
            response.json::<CompletionBody>().await.map_err(|e| {
                tracing::error!("Failed to parse chat response: {}", e);
                anyhow::Error::from(CharlaError::Provider(format!(
                    "Failed to parse chat response: {}",
                    e
                )))
            })
        };
        let body = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| self.timed_out())??;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CharlaError::Provider("Chat response had no content".to_string()))?;

        if let Some(usage) = body.usage {
            tracing::debug!(
                prompt = usage.prompt_tokens,
                completion = usage.completion_tokens,
                total = usage.total_tokens,
                "Chat token usage"
            );
        }

        Ok(Completion {
            content,
            usage: body.usage,
        })
    }
}
