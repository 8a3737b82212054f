//! ecs-spot-drain - drains an ECS container instance on spot interruption
//!
//! ## Usage
//!
//! ```bash
//! # Watch and drain (typical ECS daemon service)
//! ecs-spot-drain
//!
//! # Also flip a node_exporter gauge and call a webhook
//! USE_PROMETHEUS=1 WEBHOOK_URL=https://hooks.example.com/spot \
//!   WEBHOOK_DATA='{"text":"spot instance terminating"}' ecs-spot-drain
//!
//! # Exercise the reaction without a real notice
//! MOCK_TERMINATE=1 DISABLE_DRAIN=1 ecs-spot-drain
//! ```

use ecs_spot_drain::{Drainer, EcsDrainer, Settings, TokioClock, daemon};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ecs_spot_drain=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load()?;

    info!("========================================");
    info!("ECS spot drain starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    daemon::log_settings(&settings);
    info!("========================================");

    let region = settings.region.clone();
    let phase = daemon::run(&settings, &TokioClock, || async move {
        Box::new(EcsDrainer::from_env(region).await) as Box<dyn Drainer>
    })
    .await?;

    info!(phase = ?phase, "Reaction complete, exiting");
    Ok(())
}
