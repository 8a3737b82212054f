//! Reaction to an interruption notice
//!
//! ```text
//! Waiting --(notice or mock)--> Triggered --(metric, webhook, drain)--> Done
//! ```
//!
//! The steps run in a fixed order. Metric and webhook send failures abort the
//! sequence; a failed drain or a non-200 webhook response is only logged,
//! since the instance is going away regardless.

use crate::drain::Drainer;
use crate::error::{Result, SpotDrainError};
use crate::identity::NodeIdentity;
use crate::metrics::{MetricSink, TERMINATING_METRIC};
use crate::schedule::Poller;
use crate::watcher::TerminationSource;
use crate::webhook::Notifier;
use reqwest::StatusCode;
use tracing::{error, info, warn};

/// Sequencer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Polling for a notice
    Waiting,
    /// Notice seen, side effects in progress
    Triggered,
    /// All side effects attempted
    Done,
}

/// What moves the sequencer out of `Waiting`
pub enum Trigger {
    /// Fire immediately without polling
    Mock,
    /// Poll this source until it reports an interruption
    Watch(Box<dyn TerminationSource>),
}

/// A drainer paired with the identity it drains
///
/// Only constructible from a resolved identity.
pub struct DrainTarget {
    drainer: Box<dyn Drainer>,
    identity: NodeIdentity,
}

impl DrainTarget {
    /// Pair a drainer with a resolved identity
    pub fn new(drainer: Box<dyn Drainer>, identity: NodeIdentity) -> Result<Self> {
        if !identity.is_resolved() {
            return Err(SpotDrainError::config(
                "cannot drain without a resolved container instance",
            ));
        }
        Ok(Self { drainer, identity })
    }
}

/// Runs the interruption reaction
pub struct Sequencer {
    trigger: Trigger,
    metrics: Box<dyn MetricSink>,
    webhook: Option<Box<dyn Notifier>>,
    drain: Option<DrainTarget>,
    phase: Phase,
}

impl Sequencer {
    /// Create a sequencer with no webhook and draining disabled
    pub fn new(trigger: Trigger, metrics: Box<dyn MetricSink>) -> Self {
        Self {
            trigger,
            metrics,
            webhook: None,
            drain: None,
            phase: Phase::Waiting,
        }
    }

    /// Notify this webhook when triggered
    pub fn with_webhook(mut self, webhook: Box<dyn Notifier>) -> Self {
        self.webhook = Some(webhook);
        self
    }

    /// Drain this target when triggered
    pub fn with_drain(mut self, target: DrainTarget) -> Self {
        self.drain = Some(target);
        self
    }

    /// Current state
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Wait for the trigger, then react once
    ///
    /// Calling again after `Done` does nothing.
    pub async fn run(&mut self, poller: &Poller<'_>) -> Result<Phase> {
        if self.phase == Phase::Done {
            return Ok(self.phase);
        }

        if self.phase == Phase::Waiting {
            self.wait(poller).await;
        }

        self.react().await?;
        Ok(self.phase)
    }

    async fn wait(&mut self, poller: &Poller<'_>) {
        match &self.trigger {
            Trigger::Mock => {
                info!("Mock termination enabled, skipping metadata polling");
            }
            Trigger::Watch(source) => {
                info!(
                    interval_secs = poller.interval().as_secs(),
                    "Watching for spot interruption notice"
                );
                let source: &dyn TerminationSource = source.as_ref();
                let polls = poller.until(move || source.is_stopping()).await;
                info!(polls, "Spot interruption detected");
            }
        }

        warn!("Spot instance is terminating");
        self.phase = Phase::Triggered;
    }

    async fn react(&mut self) -> Result<()> {
        self.metrics.emit(TERMINATING_METRIC, 1).await?;

        if let Some(webhook) = &self.webhook {
            let status = webhook.notify().await?;
            if status != StatusCode::OK {
                warn!(status = %status, "Webhook did not return 200");
            }
        }

        match &self.drain {
            Some(target) => {
                if let Err(e) = target.drainer.drain(&target.identity).await {
                    error!(
                        error = %e,
                        arn = %target.identity.container_instance_arn,
                        "Failed to drain container instance, continuing shutdown"
                    );
                }
            }
            None => info!("Draining disabled, not touching ECS"),
        }

        self.phase = Phase::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ManualClock;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Events = Arc<Mutex<Vec<String>>>;

    fn events(log: &Events) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    struct FakeMetrics(Events);

    #[async_trait]
    impl MetricSink for FakeMetrics {
        async fn emit(&self, name: &str, value: i64) -> Result<()> {
            self.0.lock().unwrap().push(format!("metric {} {}", name, value));
            Ok(())
        }
    }

    struct FakeWebhook {
        log: Events,
        status: Option<StatusCode>,
    }

    #[async_trait]
    impl Notifier for FakeWebhook {
        async fn notify(&self) -> Result<StatusCode> {
            self.log.lock().unwrap().push("webhook".to_string());
            self.status
                .ok_or_else(|| SpotDrainError::config("webhook unreachable"))
        }
    }

    struct FakeDrainer {
        log: Events,
        fail: bool,
    }

    #[async_trait]
    impl Drainer for FakeDrainer {
        async fn drain(&self, identity: &NodeIdentity) -> Result<()> {
            self.log.lock().unwrap().push(format!(
                "drain {} {}",
                identity.cluster, identity.container_instance_arn
            ));
            if self.fail {
                Err(SpotDrainError::from_aws("AccessDenied"))
            } else {
                Ok(())
            }
        }
    }

    struct FakeSource {
        log: Events,
        answers: Mutex<VecDeque<bool>>,
    }

    #[async_trait]
    impl TerminationSource for FakeSource {
        async fn is_stopping(&self) -> bool {
            self.log.lock().unwrap().push("poll".to_string());
            self.answers.lock().unwrap().pop_front().unwrap_or(true)
        }
    }

    fn identity() -> NodeIdentity {
        NodeIdentity::new("c1", "arn:aws:ecs:us-east-1:123:container-instance/1")
    }

    fn full_sequencer(log: &Events, trigger: Trigger) -> Sequencer {
        let target = DrainTarget::new(
            Box::new(FakeDrainer {
                log: log.clone(),
                fail: false,
            }),
            identity(),
        )
        .unwrap();

        Sequencer::new(trigger, Box::new(FakeMetrics(log.clone())))
            .with_webhook(Box::new(FakeWebhook {
                log: log.clone(),
                status: Some(StatusCode::OK),
            }))
            .with_drain(target)
    }

    #[tokio::test]
    async fn test_mock_trigger_runs_steps_in_order() {
        let log: Events = Arc::default();
        let clock = ManualClock::new();
        let poller = Poller::new(&clock, Duration::from_secs(5));
        let mut sequencer = full_sequencer(&log, Trigger::Mock);

        let phase = sequencer.run(&poller).await.unwrap();

        assert_eq!(phase, Phase::Done);
        assert_eq!(
            events(&log),
            vec![
                "metric ecs_spot_instance_terminating 1",
                "webhook",
                "drain c1 arn:aws:ecs:us-east-1:123:container-instance/1",
            ]
        );
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_watch_trigger_polls_until_notice() {
        let log: Events = Arc::default();
        let clock = ManualClock::new();
        let poller = Poller::new(&clock, Duration::from_secs(5));
        let source = FakeSource {
            log: log.clone(),
            answers: Mutex::new(VecDeque::from([false, false, true])),
        };
        let mut sequencer = full_sequencer(&log, Trigger::Watch(Box::new(source)));
        assert_eq!(sequencer.phase(), Phase::Waiting);

        sequencer.run(&poller).await.unwrap();

        assert_eq!(
            events(&log),
            vec![
                "poll",
                "poll",
                "poll",
                "metric ecs_spot_instance_terminating 1",
                "webhook",
                "drain c1 arn:aws:ecs:us-east-1:123:container-instance/1",
            ]
        );
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 2]);
    }

    #[tokio::test]
    async fn test_runs_only_once() {
        let log: Events = Arc::default();
        let clock = ManualClock::new();
        let poller = Poller::new(&clock, Duration::from_secs(5));
        let mut sequencer = full_sequencer(&log, Trigger::Mock);

        sequencer.run(&poller).await.unwrap();
        let phase = sequencer.run(&poller).await.unwrap();

        assert_eq!(phase, Phase::Done);
        assert_eq!(events(&log).len(), 3);
    }

    #[tokio::test]
    async fn test_drain_disabled_never_drains() {
        let log: Events = Arc::default();
        let clock = ManualClock::new();
        let poller = Poller::new(&clock, Duration::from_secs(5));
        let mut sequencer = Sequencer::new(Trigger::Mock, Box::new(FakeMetrics(log.clone())));

        let phase = sequencer.run(&poller).await.unwrap();

        assert_eq!(phase, Phase::Done);
        assert_eq!(events(&log), vec!["metric ecs_spot_instance_terminating 1"]);
    }

    #[tokio::test]
    async fn test_non_200_webhook_still_drains() {
        let log: Events = Arc::default();
        let clock = ManualClock::new();
        let poller = Poller::new(&clock, Duration::from_secs(5));
        let target = DrainTarget::new(
            Box::new(FakeDrainer {
                log: log.clone(),
                fail: false,
            }),
            identity(),
        )
        .unwrap();
        let mut sequencer = Sequencer::new(Trigger::Mock, Box::new(FakeMetrics(log.clone())))
            .with_webhook(Box::new(FakeWebhook {
                log: log.clone(),
                status: Some(StatusCode::INTERNAL_SERVER_ERROR),
            }))
            .with_drain(target);

        let phase = sequencer.run(&poller).await.unwrap();

        assert_eq!(phase, Phase::Done);
        assert_eq!(events(&log).len(), 3);
    }

    #[tokio::test]
    async fn test_webhook_send_failure_aborts_before_drain() {
        let log: Events = Arc::default();
        let clock = ManualClock::new();
        let poller = Poller::new(&clock, Duration::from_secs(5));
        let target = DrainTarget::new(
            Box::new(FakeDrainer {
                log: log.clone(),
                fail: false,
            }),
            identity(),
        )
        .unwrap();
        let mut sequencer = Sequencer::new(Trigger::Mock, Box::new(FakeMetrics(log.clone())))
            .with_webhook(Box::new(FakeWebhook {
                log: log.clone(),
                status: None,
            }))
            .with_drain(target);

        assert!(sequencer.run(&poller).await.is_err());
        assert_eq!(sequencer.phase(), Phase::Triggered);
        assert_eq!(
            events(&log),
            vec!["metric ecs_spot_instance_terminating 1", "webhook"]
        );
    }

    #[tokio::test]
    async fn test_drain_failure_is_not_fatal() {
        let log: Events = Arc::default();
        let clock = ManualClock::new();
        let poller = Poller::new(&clock, Duration::from_secs(5));
        let target = DrainTarget::new(
            Box::new(FakeDrainer {
                log: log.clone(),
                fail: true,
            }),
            identity(),
        )
        .unwrap();
        let mut sequencer =
            Sequencer::new(Trigger::Mock, Box::new(FakeMetrics(log.clone()))).with_drain(target);

        let phase = sequencer.run(&poller).await.unwrap();

        assert_eq!(phase, Phase::Done);
        assert!(events(&log).iter().any(|e| e.starts_with("drain c1")));
    }

    #[test]
    fn test_drain_target_requires_resolved_identity() {
        let log: Events = Arc::default();
        let result = DrainTarget::new(
            Box::new(FakeDrainer { log, fail: false }),
            NodeIdentity::default(),
        );
        assert!(matches!(result, Err(SpotDrainError::Config(_))));
    }
}
