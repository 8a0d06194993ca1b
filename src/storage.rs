//! Session metrics persistence.
//!
//! One record per completed session. Persistence is best-effort durability:
//! the session Stop path logs a failed write and keeps going.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Durable summary of one completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Wall-clock span from start to stop.
    pub duration_secs: f64,
    /// Time spent in the active state, across pause cycles.
    pub duration_active_secs: f64,
    pub avg_hr: f64,
    pub max_hr: f64,
    pub avg_quality: f64,
    pub total_reps: u32,
    pub rep_breakdown: HashMap<String, u32>,
}

#[async_trait::async_trait]
pub trait MetricsStore: Send + Sync {
    async fn record_session_metrics(&self, record: &SessionRecord) -> Result<()>;
}

/// Append-only JSON-lines store, one session record per line.
pub struct JsonlMetricsStore {
    path: PathBuf,
}

impl JsonlMetricsStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl MetricsStore for JsonlMetricsStore {
    async fn record_session_metrics(&self, record: &SessionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create metrics directory {:?}", parent))?;
            }
        }

        let line = serde_json::to_string(record).context("Failed to serialize session record")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open metrics file {:?}", self.path))?;
        writeln!(file, "{}", line)
            .with_context(|| format!("Failed to append to metrics file {:?}", self.path))?;

        info!(
            session_id = %record.session_id,
            duration_secs = record.duration_secs,
            total_reps = record.total_reps,
            "Session metrics persisted"
        );

        Ok(())
    }
}
