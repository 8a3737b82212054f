//! ECS container instance draining
//!
//! Setting a container instance to `DRAINING` stops ECS from placing new tasks
//! on it and makes service tasks get rescheduled elsewhere, which is exactly
//! what we want during the two-minute spot warning.
//!
//! ## Prerequisites
//!
//! - IAM permission `ecs:UpdateContainerInstancesState`
//! - Credentials and region from the standard SDK provider chain

use crate::error::{Result, SpotDrainError};
use crate::identity::NodeIdentity;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ecs::Client as EcsClient;
use aws_sdk_ecs::error::DisplayErrorContext;
use aws_sdk_ecs::types::{ContainerInstanceStatus, Failure};
use aws_types::SdkConfig;
use aws_types::region::Region;
use tracing::{debug, info};

/// Takes a node out of scheduling
#[async_trait]
pub trait Drainer: Send + Sync {
    /// Mark `identity` as draining
    async fn drain(&self, identity: &NodeIdentity) -> Result<()>;
}

/// Drains through the ECS control plane
pub struct EcsDrainer {
    client: EcsClient,
}

impl EcsDrainer {
    /// Create a drainer from an existing client
    pub fn new(client: EcsClient) -> Self {
        Self { client }
    }

    /// Create from AWS config
    pub fn from_config(config: &SdkConfig) -> Self {
        Self::new(EcsClient::new(config))
    }

    /// Create from the environment, optionally pinning the region
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            debug!("Creating ECS client for region: {}", region);
            loader = loader.region(Region::new(region));
        }

        let config = loader.load().await;
        Self::from_config(&config)
    }
}

#[async_trait]
impl Drainer for EcsDrainer {
    async fn drain(&self, identity: &NodeIdentity) -> Result<()> {
        info!(
            arn = %identity.container_instance_arn,
            cluster = %identity.cluster,
            "Draining container instance"
        );

        let output = self
            .client
            .update_container_instances_state()
            .cluster(&identity.cluster)
            .container_instances(&identity.container_instance_arn)
            .status(ContainerInstanceStatus::Draining)
            .send()
            .await
            .map_err(|e| SpotDrainError::from_aws(DisplayErrorContext(e)))?;

        if let Some(reasons) = summarize_failures(output.failures()) {
            return Err(SpotDrainError::drain(reasons));
        }

        info!(
            arn = %identity.container_instance_arn,
            "Successfully drained the instance"
        );

        Ok(())
    }
}

/// Join per-instance failures into one message, `None` when there are none
fn summarize_failures(failures: &[Failure]) -> Option<String> {
    if failures.is_empty() {
        return None;
    }

    let reasons = failures
        .iter()
        .map(|f| {
            format!(
                "{}: {}",
                f.arn().unwrap_or("<unknown arn>"),
                f.reason().unwrap_or("no reason given")
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    Some(reasons)
}
