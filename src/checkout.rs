//! Hosted checkout creation
//!
//! Upgrades are paid on the payment provider's hosted page. The chat proxy
//! creates the checkout and returns its URL; the payment webhook that
//! activates the plan runs server-side.

use crate::config::ApiConfig;
use crate::entitlement::Plan;
use crate::error::{CharlaError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutRequest<'a> {
    plan_id: &'a str,
    email: &'a str,
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    init_point: Option<String>,
}

/// Client for the checkout endpoint
#[derive(Debug, Clone)]
pub struct CheckoutClient {
    client: Client,
    endpoint: String,
}

impl CheckoutClient {
    /// Creates a client for `{base_url}{checkout_path}`
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| CharlaError::Checkout(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                config.checkout_path
            ),
        })
    }

    /// Creates a checkout and returns the hosted payment URL
    ///
    /// # Errors
    ///
    /// Returns `CharlaError::Checkout` for the free plan (nothing to buy),
    /// a non-success status, or a response without a URL
    pub async fn create_checkout(&self, plan: Plan, email: &str, user_id: &str) -> Result<String> {
        if !plan.is_unlimited() {
            return Err(CharlaError::Checkout("the free plan cannot be purchased".to_string()).into());
        }

        tracing::info!("Creating checkout for plan {}", plan);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&CheckoutRequest {
                plan_id: plan.as_str(),
                email,
                user_id,
            })
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Checkout request failed: {}", e);
                CharlaError::Checkout(format!("Checkout request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Checkout endpoint returned error {}: {}", status, error_text);
            return Err(CharlaError::Checkout(format!(
                "checkout endpoint returned {}: {}",
                status, error_text
            ))
            .into());
        }

        let body: CheckoutResponse = response
            .json()
            .await
            .map_err(|e| CharlaError::Checkout(format!("Failed to parse checkout response: {}", e)))?;

        body.url
            .or(body.init_point)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| CharlaError::Checkout("checkout response has no URL".to_string()).into())
    }
}
