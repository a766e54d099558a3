use crate::config::config::ReportCfg;
use crate::core::types::Prediction;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Destination for finished predictions. Implementations own their rate
/// limiting; the pipeline fires and forgets.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn record(&self, prediction: &Prediction) -> Result<()>;
}

/// Append-only JSONL file sink. Writes closer together than the
/// configured interval are dropped, not queued.
pub struct JsonlSink {
    path: PathBuf,
    min_interval: std::time::Duration,
    last_write: Mutex<Option<Instant>>,
}

impl JsonlSink {
    pub fn from_cfg(cfg: &ReportCfg) -> Self {
        Self {
            path: PathBuf::from(&cfg.log_path),
            min_interval: cfg.min_write_interval,
            last_write: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LogSink for JsonlSink {
    async fn record(&self, prediction: &Prediction) -> Result<()> {
        let mut last = self.last_write.lock().await;
        if let Some(prev) = *last {
            if prev.elapsed() < self.min_interval {
                debug!("prediction record dropped, write interval not elapsed");
                return Ok(());
            }
        }

        let line = serde_json::to_string(prediction).context("serializing prediction")?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(file, "{}", line).context("writing prediction record")?;

        *last = Some(Instant::now());
        Ok(())
    }
}
