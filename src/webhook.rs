//! Webhook notification on interruption
//!
//! The payload is opaque: whatever is in `WEBHOOK_DATA` is posted as-is with a
//! JSON content type, so it can target Slack, PagerDuty, or an internal hook.

use crate::error::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::info;

/// Timeout for the webhook call (seconds)
pub const WEBHOOK_TIMEOUT_SECS: u64 = 60;

/// Something to tell about the interruption
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send the notification and report the response status
    async fn notify(&self) -> Result<StatusCode>;
}

/// POSTs a fixed payload to a URL
pub struct WebhookClient {
    client: reqwest::Client,
    url: String,
    payload: String,
}

impl WebhookClient {
    /// Create a webhook client
    pub fn new(url: impl Into<String>, payload: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            payload: payload.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookClient {
    async fn notify(&self) -> Result<StatusCode> {
        info!(url = %self.url, "Triggering webhook");

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(self.payload.clone())
            .send()
            .await?;

        let status = response.status();
        info!(status = %status, "Webhook response");

        Ok(status)
    }
}
