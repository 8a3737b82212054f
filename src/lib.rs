//! # ECS Spot Drain
//!
//! Watches an EC2 spot instance for interruption notices and takes its ECS
//! container instance out of service before AWS reclaims it.
//!
//! ## Lifecycle
//!
//! ```text
//! ECS agent (127.0.0.1:51678)      Instance metadata (169.254.169.254)
//!        │ identity                        │ spot/instance-action
//!        ▼                                 ▼
//!   IdentityResolver ──────────► TerminationWatcher (every 5s)
//!                                          │ 200
//!                                          ▼
//!                      gauge=1 ──► webhook ──► ECS DRAINING ──► exit 0
//! ```
//!
//! Everything runs sequentially. Waiting goes through [`schedule::Clock`] so
//! the loops can be driven without real sleeps.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod daemon;
pub mod drain;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod reaction;
pub mod schedule;
pub mod watcher;
pub mod webhook;

#[cfg(test)]
mod testing;

// Configuration
pub use config::{Cli, Settings};

// Error handling
pub use error::{Result, SpotDrainError};

// Components
pub use drain::{Drainer, EcsDrainer};
pub use identity::{IdentityResolver, NodeIdentity};
pub use metrics::{MetricSink, TERMINATING_METRIC, TextfileMetrics};
pub use reaction::{DrainTarget, Phase, Sequencer, Trigger};
pub use schedule::{Clock, Poller, TokioClock};
pub use watcher::{SpotAction, TerminationNotice, TerminationSource, TerminationWatcher};
pub use webhook::{Notifier, WebhookClient};
