//! node_exporter textfile gauge
//!
//! The node_exporter textfile collector scrapes every `*.prom` file in its
//! directory. A single gauge tells dashboards that this instance has received
//! an interruption notice:
//!
//! ```text
//! ecs_spot_instance_terminating 1
//! ```

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Gauge written at startup (0) and on interruption (1)
pub const TERMINATING_METRIC: &str = "ecs_spot_instance_terminating";

/// File mode of the written `.prom` file
#[cfg(unix)]
const METRIC_FILE_MODE: u32 = 0o644;

/// Destination for gauge updates
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Set `name` to `value`
    async fn emit(&self, name: &str, value: i64) -> Result<()>;
}

/// Writes gauges into the node_exporter textfile directory
#[derive(Debug, Clone)]
pub struct TextfileMetrics {
    dir: PathBuf,
    enabled: bool,
}

impl TextfileMetrics {
    /// Create an emitter; when `enabled` is false every emit is a no-op
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
        }
    }

    /// `<dir>/<name>.prom`
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.prom", name))
    }

    /// Exposition line for one sample
    pub fn render(name: &str, value: i64) -> String {
        format!("{} {}\n", name, value)
    }
}

#[async_trait]
impl MetricSink for TextfileMetrics {
    async fn emit(&self, name: &str, value: i64) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let path = self.path_for(name);
        info!(metric = name, value, path = %path.display(), "Writing Prometheus metric");

        // Stage next to the target so the rename stays on one filesystem
        let staging = self.dir.join(format!(".{}.prom.tmp", name));
        write_staged(&staging, Self::render(name, value).as_bytes()).await?;
        tokio::fs::rename(&staging, &path).await?;

        Ok(())
    }
}

async fn write_staged(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(METRIC_FILE_MODE))
            .await?;
    }

    Ok(())
}
