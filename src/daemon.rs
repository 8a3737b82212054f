//! Top-level lifecycle
//!
//! ```text
//! settings -> identity (unless draining is disabled) -> gauge 0
//!          -> wait for notice -> gauge 1 -> webhook -> drain -> Done
//! ```

use crate::config::Settings;
use crate::drain::Drainer;
use crate::error::Result;
use crate::identity::IdentityResolver;
use crate::metrics::{MetricSink, TERMINATING_METRIC, TextfileMetrics};
use crate::reaction::{DrainTarget, Phase, Sequencer, Trigger};
use crate::schedule::{Clock, Poller};
use crate::watcher::TerminationWatcher;
use crate::webhook::WebhookClient;
use std::future::Future;
use tracing::info;

/// Log the effective settings at startup
pub fn log_settings(settings: &Settings) {
    info!("Prometheus: {}", settings.metrics_enabled);
    info!("Mock Terminate: {}", settings.mock_terminate);
    info!("Disable Draining: {}", settings.disable_drain);
    info!(
        "Webhook URL: {}",
        settings.webhook_url.as_deref().unwrap_or("<none>")
    );
    info!("Metadata host: {}", settings.metadata_host);
    info!("Poll interval: {}s", settings.poll_interval.as_secs());
}

/// Run the watcher until the reaction completes
///
/// `connect_drainer` is only awaited when draining is enabled, after the
/// node identity is known.
pub async fn run<F, Fut>(
    settings: &Settings,
    clock: &dyn Clock,
    connect_drainer: F,
) -> Result<Phase>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Box<dyn Drainer>>,
{
    let drain = if settings.disable_drain {
        None
    } else {
        let resolver = IdentityResolver::new(&settings.agent_metadata_url)?;
        let identity = resolver.resolve(clock).await;
        Some(DrainTarget::new(connect_drainer().await, identity)?)
    };

    let metrics = TextfileMetrics::new(&settings.textfile_dir, settings.metrics_enabled);
    metrics.emit(TERMINATING_METRIC, 0).await?;

    let trigger = if settings.mock_terminate {
        Trigger::Mock
    } else {
        Trigger::Watch(Box::new(TerminationWatcher::new(&settings.metadata_host)?))
    };

    let mut sequencer = Sequencer::new(trigger, Box::new(metrics));

    if let Some(url) = &settings.webhook_url {
        sequencer = sequencer.with_webhook(Box::new(WebhookClient::new(
            url.as_str(),
            settings.webhook_data.as_str(),
        )?));
    }

    if let Some(target) = drain {
        sequencer = sequencer.with_drain(target);
    }

    let poller = Poller::new(clock, settings.poll_interval);
    sequencer.run(&poller).await
}
