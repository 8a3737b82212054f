//! Spot instance interruption watcher
//!
//! Polls the EC2 instance metadata endpoint for spot termination notices.
//!
//! ## Metadata Endpoint
//!
//! ```text
//! http://169.254.169.254/latest/meta-data/spot/instance-action
//! ```
//!
//! The endpoint answers 404 until an interruption is scheduled, then 200 with:
//! ```json
//! {
//!   "action": "terminate",
//!   "time": "2024-01-17T10:30:00Z"
//! }
//! ```
//!
//! The status code alone decides; the body is only parsed for logging.
//!
//! Requests carry an IMDSv2 session token when the service hands one out.
//! The token is reused until shortly before it expires; a service that
//! refuses tokens is polled over IMDSv1 and asked again every few minutes.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Spot instance action path
const SPOT_ACTION_PATH: &str = "/latest/meta-data/spot/instance-action";

/// IMDSv2 session token path
const TOKEN_PATH: &str = "/latest/api/token";

/// Header carrying the IMDSv2 session token
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Header requesting an IMDSv2 session token lifetime
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";

/// Requested IMDSv2 token lifetime (seconds)
const TOKEN_TTL_SECS: u64 = 60;

/// A cached token is replaced this long before it expires (seconds)
const TOKEN_RENEW_MARGIN_SECS: u64 = 10;

/// How long an IMDSv1-only answer is trusted before asking for a token again (seconds)
const IMDSV1_RECHECK_SECS: u64 = 300;

/// Timeout for metadata requests (seconds)
pub const METADATA_TIMEOUT_SECS: u64 = 2;

/// Spot interruption action type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpotAction {
    /// Instance will be terminated
    Terminate,
    /// Instance will be stopped
    Stop,
    /// Instance will be hibernated
    Hibernate,
    /// Action this build does not know about
    Unknown(String),
}

impl SpotAction {
    /// Parse from string (as returned by AWS metadata endpoint)
    pub fn parse(s: &str) -> Self {
        match s {
            "terminate" => Self::Terminate,
            "stop" => Self::Stop,
            "hibernate" => Self::Hibernate,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Details of a scheduled interruption, as far as the body could be read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationNotice {
    /// The action that will be taken
    pub action: Option<SpotAction>,

    /// When the action will occur
    pub time: Option<DateTime<Utc>>,
}

impl TerminationNotice {
    /// Parse the instance-action body, keeping whatever fields are valid
    pub fn from_body(body: &str) -> Self {
        let Ok(raw) = serde_json::from_str::<SpotInstanceAction>(body) else {
            return Self::default();
        };

        Self {
            action: Some(SpotAction::parse(&raw.action)),
            time: DateTime::parse_from_rfc3339(&raw.time)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
        }
    }

    /// Seconds left before the action, zero once it has passed
    pub fn seconds_until_action(&self, now: DateTime<Utc>) -> Option<u64> {
        self.time.map(|time| (time - now).num_seconds().max(0) as u64)
    }
}

/// Raw spot instance action response from AWS
#[derive(Debug, Deserialize)]
struct SpotInstanceAction {
    action: String,
    time: String,
}

/// Anything that can say whether this instance is being reclaimed
#[async_trait]
pub trait TerminationSource: Send + Sync {
    /// Single check; `true` when an interruption is scheduled
    async fn is_stopping(&self) -> bool;
}

/// What the metadata service last said about session tokens
#[derive(Debug, Clone)]
enum ImdsSession {
    /// Not asked yet, or the last token was rejected
    Unknown,
    /// IMDSv2 token usable until `renew_at`
    Token { value: String, renew_at: Instant },
    /// Service refused a token; poll without one until `recheck_at`
    V1 { recheck_at: Instant },
}

/// Termination watcher backed by the instance metadata service
pub struct TerminationWatcher {
    /// HTTP client for metadata endpoint
    client: reqwest::Client,

    /// `http://<host>`
    base_url: String,

    session: Mutex<ImdsSession>,
}

impl TerminationWatcher {
    /// Create a watcher for the given metadata host (`host` or `host:port`)
    pub fn new(metadata_host: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(METADATA_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: format!("http://{}", metadata_host),
            session: Mutex::new(ImdsSession::Unknown),
        })
    }

    fn session(&self) -> MutexGuard<'_, ImdsSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token to send with the next request, `None` to go without one
    async fn session_token(&self) -> Option<String> {
        let now = Instant::now();
        let cached = match &*self.session() {
            ImdsSession::Token { value, renew_at } if now < *renew_at => Some(Some(value.clone())),
            ImdsSession::V1 { recheck_at } if now < *recheck_at => Some(None),
            _ => None,
        };
        if let Some(token) = cached {
            return token;
        }

        match self.request_token().await {
            Ok(Some(token)) => {
                let renew_at = now + Duration::from_secs(TOKEN_TTL_SECS - TOKEN_RENEW_MARGIN_SECS);
                *self.session() = ImdsSession::Token {
                    value: token.clone(),
                    renew_at,
                };
                Some(token)
            }
            Ok(None) => {
                let recheck_at = now + Duration::from_secs(IMDSV1_RECHECK_SECS);
                *self.session() = ImdsSession::V1 { recheck_at };
                None
            }
            Err(e) => {
                debug!(error = %e, "IMDSv2 token request failed, trying without token");
                None
            }
        }
    }

    /// Ask for a fresh IMDSv2 token, `Ok(None)` when the service only speaks IMDSv1
    async fn request_token(&self) -> Result<Option<String>> {
        let url = format!("{}{}", self.base_url, TOKEN_PATH);

        let response = self
            .client
            .put(&url)
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECS.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "No IMDSv2 token, falling back to IMDSv1");
            return Ok(None);
        }

        let token = response.text().await?;
        Ok(Some(token).filter(|t| !t.is_empty()))
    }

    /// Check once for a spot interruption notice
    ///
    /// Returns `Ok(None)` if no notice is present (instance is safe).
    /// Returns `Ok(Some(notice))` if the endpoint answered 200.
    pub async fn check(&self) -> Result<Option<TerminationNotice>> {
        let url = format!("{}{}", self.base_url, SPOT_ACTION_PATH);

        debug!("Checking spot interruption notice at {}", url);

        let mut request = self.client.get(&url);
        if let Some(token) = self.session_token().await {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request.send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("IMDSv2 token rejected, requesting a new one next poll");
            *self.session() = ImdsSession::Unknown;
            return Ok(None);
        }

        if response.status() != StatusCode::OK {
            debug!(status = %response.status(), "No spot interruption notice");
            return Ok(None);
        }

        let notice = match response.text().await {
            Ok(body) => TerminationNotice::from_body(&body),
            Err(e) => {
                warn!(error = %e, "Could not read instance-action body");
                TerminationNotice::default()
            }
        };

        info!(
            action = ?notice.action,
            time = ?notice.time,
            seconds_until = ?notice.seconds_until_action(Utc::now()),
            "Spot interruption notice received"
        );

        Ok(Some(notice))
    }
}

#[async_trait]
impl TerminationSource for TerminationWatcher {
    async fn is_stopping(&self) -> bool {
        match self.check().await {
            Ok(notice) => notice.is_some(),
            Err(e) => {
                warn!(error = %e, "Error checking spot notice, will retry");
                false
            }
        }
    }
}
