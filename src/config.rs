//! Startup configuration
//!
//! Every option can be given on the command line or through the environment
//! variable the container image has always used (`WEBHOOK_URL`,
//! `MOCK_TERMINATE`, ...). The parsed [`Cli`] is turned into an immutable
//! [`Settings`] once and handed to each component.
//!
//! Boolean switches keep the historical semantics: any non-empty value turns
//! them on, so `DISABLE_DRAIN=false` still disables draining.

use crate::error::{Result, SpotDrainError};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Default EC2 instance metadata host
pub const DEFAULT_METADATA_HOST: &str = "169.254.169.254";

/// Default ECS agent introspection endpoint
pub const DEFAULT_AGENT_METADATA_URL: &str = "http://127.0.0.1:51678/v1/metadata";

/// Default node_exporter textfile collector directory
pub const DEFAULT_TEXTFILE_DIR: &str = "/var/lib/node_exporter";

/// Default interval between termination polls (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Watches for spot interruption notices and drains this ECS container instance
#[derive(Parser, Debug)]
#[command(name = "ecs-spot-drain")]
#[command(about = "Drain an ECS container instance when its spot instance is reclaimed", long_about = None)]
pub struct Cli {
    /// Webhook to POST when a termination notice arrives
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Raw JSON body sent to the webhook
    #[arg(long, env = "WEBHOOK_DATA")]
    pub webhook_data: Option<String>,

    /// Act as if a termination notice was received (any non-empty value)
    #[arg(long, env = "MOCK_TERMINATE", value_name = "VALUE")]
    pub mock_terminate: Option<String>,

    /// Skip the ECS drain call (any non-empty value)
    #[arg(long, env = "DISABLE_DRAIN", value_name = "VALUE")]
    pub disable_drain: Option<String>,

    /// Write the termination gauge for node_exporter (any non-empty value)
    #[arg(long, env = "USE_PROMETHEUS", value_name = "VALUE")]
    pub use_prometheus: Option<String>,

    /// EC2 instance metadata host [default: 169.254.169.254]
    #[arg(long, env = "EC2METADATA_URL")]
    pub metadata_host: Option<String>,

    /// ECS agent introspection endpoint [default: http://127.0.0.1:51678/v1/metadata]
    #[arg(long, env = "ECS_AGENT_METADATA_URL")]
    pub agent_metadata_url: Option<String>,

    /// node_exporter textfile collector directory [default: /var/lib/node_exporter]
    #[arg(long, env = "PROMETHEUS_TEXTFILE_DIR")]
    pub textfile_dir: Option<String>,

    /// Termination polling interval (seconds)
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval: u64,

    /// AWS region for the ECS client (default: SDK provider chain)
    #[arg(long)]
    pub region: Option<String>,
}

/// Immutable runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Webhook URL, `None` when not configured
    pub webhook_url: Option<String>,

    /// Webhook body, sent verbatim
    pub webhook_data: String,

    /// Trigger the reaction without asking the metadata service
    pub mock_terminate: bool,

    /// Never call the ECS drain API
    pub disable_drain: bool,

    /// Write the node_exporter gauge
    pub metrics_enabled: bool,

    /// Host (and optional port) of the instance metadata service
    pub metadata_host: String,

    /// Full URL of the ECS agent metadata endpoint
    pub agent_metadata_url: String,

    /// Directory the `.prom` file is written into
    pub textfile_dir: PathBuf,

    /// Delay between termination polls
    pub poll_interval: Duration,

    /// AWS region override
    pub region: Option<String>,
}

impl Settings {
    /// Parse the process arguments and environment
    pub fn load() -> Result<Self> {
        Self::from_cli(Cli::parse())
    }

    /// Build settings from parsed arguments
    pub fn from_cli(cli: Cli) -> Result<Self> {
        if cli.poll_interval == 0 {
            return Err(SpotDrainError::config(
                "poll interval must be at least one second",
            ));
        }

        Ok(Self {
            webhook_url: cli.webhook_url.filter(|url| !url.is_empty()),
            webhook_data: cli.webhook_data.unwrap_or_default(),
            mock_terminate: is_set(&cli.mock_terminate),
            disable_drain: is_set(&cli.disable_drain),
            metrics_enabled: is_set(&cli.use_prometheus),
            metadata_host: or_default(cli.metadata_host, DEFAULT_METADATA_HOST),
            agent_metadata_url: or_default(cli.agent_metadata_url, DEFAULT_AGENT_METADATA_URL),
            textfile_dir: PathBuf::from(or_default(cli.textfile_dir, DEFAULT_TEXTFILE_DIR)),
            poll_interval: Duration::from_secs(cli.poll_interval),
            region: cli.region,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_data: String::new(),
            mock_terminate: false,
            disable_drain: false,
            metrics_enabled: false,
            metadata_host: DEFAULT_METADATA_HOST.to_string(),
            agent_metadata_url: DEFAULT_AGENT_METADATA_URL.to_string(),
            textfile_dir: PathBuf::from(DEFAULT_TEXTFILE_DIR),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            region: None,
        }
    }
}

/// A switch is on when present with a non-empty value
fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

/// Unset and empty values both fall back to `default`
fn or_default(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["ecs-spot-drain"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_cli(parse(&[])).unwrap();
        assert_eq!(settings.metadata_host, DEFAULT_METADATA_HOST);
        assert_eq!(settings.agent_metadata_url, DEFAULT_AGENT_METADATA_URL);
        assert_eq!(settings.textfile_dir, PathBuf::from(DEFAULT_TEXTFILE_DIR));
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert!(settings.webhook_url.is_none());
        assert!(!settings.mock_terminate);
        assert!(!settings.disable_drain);
        assert!(!settings.metrics_enabled);
    }

    #[test]
    fn test_switches_accept_any_non_empty_value() {
        let settings = Settings::from_cli(parse(&[
            "--mock-terminate",
            "1",
            "--disable-drain",
            "false",
            "--use-prometheus",
            "yes",
        ]))
        .unwrap();
        assert!(settings.mock_terminate);
        assert!(settings.disable_drain);
        assert!(settings.metrics_enabled);
    }

    #[test]
    fn test_empty_switch_is_off() {
        assert!(!is_set(&Some(String::new())));
        assert!(!is_set(&None));
        assert!(is_set(&Some("0".to_string())));
    }

    #[test]
    fn test_empty_webhook_url_is_none() {
        let settings = Settings::from_cli(parse(&["--webhook-url", ""])).unwrap();
        assert!(settings.webhook_url.is_none());
    }

    #[test]
    fn test_webhook_and_paths() {
        let settings = Settings::from_cli(parse(&[
            "--webhook-url",
            "http://hooks.local/spot",
            "--webhook-data",
            r#"{"text":"spot"}"#,
            "--metadata-host",
            "127.0.0.1:1338",
            "--textfile-dir",
            "/tmp/textfile",
            "--poll-interval",
            "2",
        ]))
        .unwrap();
        assert_eq!(settings.webhook_url.as_deref(), Some("http://hooks.local/spot"));
        assert_eq!(settings.webhook_data, r#"{"text":"spot"}"#);
        assert_eq!(settings.metadata_host, "127.0.0.1:1338");
        assert_eq!(settings.textfile_dir, PathBuf::from("/tmp/textfile"));
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_empty_paths_fall_back_to_defaults() {
        let settings = Settings::from_cli(parse(&[
            "--metadata-host",
            "",
            "--textfile-dir",
            "",
            "--agent-metadata-url",
            "",
        ]))
        .unwrap();
        assert_eq!(settings.metadata_host, DEFAULT_METADATA_HOST);
        assert_eq!(settings.textfile_dir, PathBuf::from(DEFAULT_TEXTFILE_DIR));
        assert_eq!(settings.agent_metadata_url, DEFAULT_AGENT_METADATA_URL);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = Settings::from_cli(parse(&["--poll-interval", "0"])).unwrap_err();
        assert!(matches!(err, SpotDrainError::Config(_)));
    }
}
