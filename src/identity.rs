//! ECS container instance identity
//!
//! The ECS agent exposes an introspection API on the instance:
//!
//! ```text
//! GET http://127.0.0.1:51678/v1/metadata
//! {"Cluster": "default", "ContainerInstanceArn": "arn:aws:ecs:...", "Version": "..."}
//! ```
//!
//! Until the agent has registered with its cluster it may be unreachable or
//! answer with empty fields, so resolution retries until both are present.

use crate::error::{Result, SpotDrainError};
use crate::schedule::Clock;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for a single agent request (seconds)
pub const AGENT_TIMEOUT_SECS: u64 = 2;

/// Delay between resolution attempts (seconds)
pub const RETRY_INTERVAL_SECS: u64 = 5;

/// Identity of this node inside its ECS cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NodeIdentity {
    /// Cluster name
    #[serde(rename = "Cluster", default)]
    pub cluster: String,

    /// Container instance ARN
    #[serde(rename = "ContainerInstanceArn", default)]
    pub container_instance_arn: String,
}

impl NodeIdentity {
    /// Create an identity from its parts
    pub fn new(cluster: impl Into<String>, container_instance_arn: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            container_instance_arn: container_instance_arn.into(),
        }
    }

    /// Whether the agent has reported both cluster and ARN
    pub fn is_resolved(&self) -> bool {
        !self.cluster.is_empty() && !self.container_instance_arn.is_empty()
    }
}

/// Resolves [`NodeIdentity`] from the ECS agent
pub struct IdentityResolver {
    client: reqwest::Client,
    url: String,
}

impl IdentityResolver {
    /// Create a resolver for the given agent metadata URL
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(AGENT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Ask the agent once
    pub async fn fetch(&self) -> Result<NodeIdentity> {
        let response = self.client.get(&self.url).send().await?;
        debug!(status = %response.status(), "ECS agent responded");

        let response = response.error_for_status()?;
        let body = response.text().await?;
        let identity: NodeIdentity = serde_json::from_str(&body)?;

        Ok(identity)
    }

    /// Block until the agent reports a complete identity
    ///
    /// Every failure is retried after the retry interval; this never gives up.
    pub async fn resolve(&self, clock: &dyn Clock) -> NodeIdentity {
        loop {
            match self.fetch().await {
                Ok(identity) if identity.is_resolved() => {
                    info!(
                        arn = %identity.container_instance_arn,
                        cluster = %identity.cluster,
                        "Found ECS container instance"
                    );
                    return identity;
                }
                Ok(_) => {
                    warn!("ECS agent has not registered the container instance yet, retrying");
                }
                Err(SpotDrainError::Http(e)) if e.is_connect() || e.is_timeout() => {
                    warn!(error = %e, url = %self.url, "Cannot communicate with ECS agent, retrying");
                }
                Err(e) => {
                    warn!(error = %e, url = %self.url, "Unexpected response from ECS agent, retrying");
                }
            }

            clock.sleep(Duration::from_secs(RETRY_INTERVAL_SECS)).await;
        }
    }
}
