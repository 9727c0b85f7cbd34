//! Bearer credentials for the chat proxy
//!
//! Tokens come from the hosted auth backend and are kept in the local
//! key-value store. [`RefreshingTokenSource`] never hands out a token that
//! is within [`REFRESH_MARGIN_SECS`] of expiry: it refreshes first, and if
//! that fails the caller gets `CharlaError::LoginRequired` instead of a
//! token that would be rejected mid-request.

use crate::config::AuthConfig;
use crate::error::{CharlaError, Result};
use crate::local_state::{KeyValueStore, KEY_AUTH_TOKENS};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Seconds before expiry at which a token is refreshed
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// Clock used for expiry checks
pub type NowFn = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Session tokens issued by the auth backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    /// Bearer token for the chat proxy
    pub access_token: String,
    /// Long-lived token exchanged for a new pair
    pub refresh_token: String,
    /// Access token expiry
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl AuthTokens {
    /// Whether the access token expires within [`REFRESH_MARGIN_SECS`] of `now`
    ///
    /// # Examples
    ///
    /// ```
    /// use charla::auth::AuthTokens;
    /// use chrono::{Duration, Utc};
    ///
    /// let now = Utc::now();
    /// let tokens = AuthTokens {
    ///     access_token: "a".to_string(),
    ///     refresh_token: "r".to_string(),
    ///     expires_at: now + Duration::seconds(30),
    /// };
    /// assert!(tokens.needs_refresh(now));
    /// assert!(!tokens.needs_refresh(now - Duration::minutes(10)));
    /// ```
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now <= Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

/// Reads the stored tokens; unreadable entries count as absent
pub fn load_tokens(store: &dyn KeyValueStore) -> Option<AuthTokens> {
    match store.get(KEY_AUTH_TOKENS) {
        Ok(Some(json)) => match serde_json::from_str(&json) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                tracing::warn!("Stored auth tokens are unreadable: {}", e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Failed to read auth tokens: {}", e);
            None
        }
    }
}

/// Persists tokens to the local store
pub fn save_tokens(store: &dyn KeyValueStore, tokens: &AuthTokens) -> Result<()> {
    let json = serde_json::to_string(tokens)?;
    store.set(KEY_AUTH_TOKENS, &json)
}

/// Removes stored tokens
pub fn clear_tokens(store: &dyn KeyValueStore) -> Result<()> {
    store.remove(KEY_AUTH_TOKENS)
}

/// Anything that can produce a live bearer token
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a token that is safe to put on the wire now
    ///
    /// # Errors
    ///
    /// Returns `CharlaError::LoginRequired` when no live token can be produced
    async fn access_token(&self) -> Result<String>;
}

/// Fixed token, e.g. from `CHARLA_TOKEN`
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Wraps a token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String> {
        if self.token.trim().is_empty() {
            return Err(CharlaError::LoginRequired("empty static token".to_string()).into());
        }
        Ok(self.token.clone())
    }
}

/// Exchanges a refresh token for a new token pair
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Performs the exchange
    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
}

impl TokenResponse {
    fn into_tokens(self, now: DateTime<Utc>) -> Result<AuthTokens> {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => DateTime::from_timestamp(at, 0)
                .ok_or_else(|| CharlaError::Provider(format!("Invalid expires_at: {}", at)))?,
            (None, Some(secs)) => now + Duration::seconds(secs),
            (None, None) => {
                return Err(
                    CharlaError::Provider("Token response has no expiry".to_string()).into(),
                )
            }
        };
        Ok(AuthTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        })
    }
}

/// Client for the hosted auth backend's token endpoint
#[derive(Debug, Clone)]
pub struct AuthClient {
    client: Client,
    auth_url: String,
    anon_key: String,
}

impl AuthClient {
    /// Creates a client from the auth section of the configuration
    ///
    /// # Errors
    ///
    /// Returns `CharlaError::Config` when the auth URL or key is missing
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let auth_url = config
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| CharlaError::Config("auth.url is not configured".to_string()))?;
        let anon_key = config
            .anon_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CharlaError::Config("auth.anon_key is not configured".to_string()))?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| CharlaError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            auth_url: auth_url.trim_end_matches('/').to_string(),
            anon_key,
        })
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> Result<AuthTokens> {
        let url = format!("{}/auth/v1/token?grant_type={}", self.auth_url, grant_type);
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Auth request failed: {}", e);
                CharlaError::Provider(format!("Auth request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Auth backend returned error {}: {}", status, error_text);
            return Err(CharlaError::LoginRequired(format!(
                "auth backend returned {}: {}",
                status, error_text
            ))
            .into());
        }

        let parsed: TokenResponse = response.json().await.map_err(|e| {
            CharlaError::Provider(format!("Failed to parse token response: {}", e))
        })?;
        parsed.into_tokens(Utc::now())
    }

    /// Signs in with email and password
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthTokens> {
        tracing::info!("Signing in as {}", email);
        self.token_grant(
            "password",
            serde_json::json!({"email": email, "password": password}),
        )
        .await
    }
}

#[async_trait]
impl TokenRefresher for AuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens> {
        tracing::debug!("Refreshing access token");
        self.token_grant(
            "refresh_token",
            serde_json::json!({"refresh_token": refresh_token}),
        )
        .await
    }
}

/// Token source backed by stored tokens and a refresher
pub struct RefreshingTokenSource {
    store: Arc<dyn KeyValueStore>,
    refresher: Box<dyn TokenRefresher>,
    now: NowFn,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl RefreshingTokenSource {
    /// Creates a source using the system clock
    pub fn new(store: Arc<dyn KeyValueStore>, refresher: Box<dyn TokenRefresher>) -> Self {
        Self::with_clock(store, refresher, Box::new(Utc::now))
    }

    /// Creates a source with an injected clock
    pub fn with_clock(
        store: Arc<dyn KeyValueStore>,
        refresher: Box<dyn TokenRefresher>,
        now: NowFn,
    ) -> Self {
        Self {
            store,
            refresher,
            now,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl TokenSource for RefreshingTokenSource {
    async fn access_token(&self) -> Result<String> {
        // One refresh at a time; a refresh token is single-use.
        let _guard = self.refresh_lock.lock().await;

        let tokens = load_tokens(self.store.as_ref())
            .ok_or_else(|| CharlaError::LoginRequired("not logged in".to_string()))?;

        let now = (self.now)();
        if !tokens.needs_refresh(now) {
            tracing::debug!("Using stored access token");
            return Ok(tokens.access_token);
        }

        tracing::info!("Access token expires at {}, refreshing", tokens.expires_at);
        let refreshed = match self.refresher.refresh(&tokens.refresh_token).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                return Err(CharlaError::LoginRequired(format!("token refresh failed: {}", e)).into());
            }
        };

        if let Err(e) = save_tokens(self.store.as_ref(), &refreshed) {
            tracing::warn!("Failed to persist refreshed tokens: {}", e);
        }
        Ok(refreshed.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_state::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresher {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CharlaError::Provider("revoked".to_string()).into());
            }
            Ok(AuthTokens {
                access_token: format!("fresh-from-{}", refresh_token),
                refresh_token: "r2".to_string(),
                expires_at: fixed_now() + Duration::hours(1),
            })
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_800_000_000, 0).unwrap()
    }

    fn source_with(
        expires_in: i64,
        fail: bool,
    ) -> (RefreshingTokenSource, Arc<dyn KeyValueStore>, Arc<AtomicUsize>) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        save_tokens(
            store.as_ref(),
            &AuthTokens {
                access_token: "a1".to_string(),
                refresh_token: "r1".to_string(),
                expires_at: fixed_now() + Duration::seconds(expires_in),
            },
        )
        .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let refresher = CountingRefresher {
            calls: Arc::clone(&calls),
            fail,
        };
        let source =
            RefreshingTokenSource::with_clock(Arc::clone(&store), Box::new(refresher), Box::new(fixed_now));
        (source, store, calls)
    }

    #[tokio::test]
    async fn test_live_token_is_returned_without_refresh() {
        let (source, _store, calls) = source_with(3600, false);
        assert_eq!(source.access_token().await.unwrap(), "a1");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_near_expiry_token_is_refreshed_first() {
        let (source, store, calls) = source_with(45, false);
        assert_eq!(source.access_token().await.unwrap(), "fresh-from-r1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(load_tokens(store.as_ref()).unwrap().refresh_token, "r2");
    }

    #[tokio::test]
    async fn test_exact_margin_refreshes() {
        let (source, _store, calls) = source_with(REFRESH_MARGIN_SECS, false);
        source.access_token().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_fails_closed() {
        let (source, _store, _calls) = source_with(10, true);
        let err = source.access_token().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CharlaError>(),
            Some(CharlaError::LoginRequired(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_tokens_require_login() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let refresher = CountingRefresher {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        };
        let source = RefreshingTokenSource::new(store, Box::new(refresher));
        let err = source.access_token().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CharlaError>(),
            Some(CharlaError::LoginRequired(_))
        ));
    }

    #[tokio::test]
    async fn test_static_token_source() {
        assert_eq!(StaticTokenSource::new("k").access_token().await.unwrap(), "k");
        assert!(StaticTokenSource::new("  ").access_token().await.is_err());
    }

    #[test]
    fn test_token_response_expiry_variants() {
        let now = fixed_now();
        let by_in = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: Some(3600),
            expires_at: None,
        }
        .into_tokens(now)
        .unwrap();
        assert_eq!(by_in.expires_at, now + Duration::hours(1));

        let by_at = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: Some(3600),
            expires_at: Some(1_900_000_000),
        }
        .into_tokens(now)
        .unwrap();
        assert_eq!(by_at.expires_at.timestamp(), 1_900_000_000);

        let neither = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: None,
            expires_at: None,
        };
        assert!(neither.into_tokens(now).is_err());
    }

    #[test]
    fn test_auth_client_requires_config() {
        assert!(AuthClient::new(&AuthConfig::default()).is_err());
        let config = AuthConfig {
            url: Some("https://auth.example/".to_string()),
            anon_key: Some("anon".to_string()),
        };
        assert!(AuthClient::new(&config).is_ok());
    }

    #[test]
    fn test_unreadable_tokens_count_as_absent() {
        let store = MemoryStore::new();
        store.set(KEY_AUTH_TOKENS, "{broken").unwrap();
        assert!(load_tokens(&store).is_none());
    }
}
