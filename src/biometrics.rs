//! Heart-rate telemetry collaborator contract.
//!
//! Session stop folds a mean/max heart rate over the session window into
//! the persisted record. The lookup is strictly best-effort: an empty or
//! failing provider yields zeros and never fails the session operation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// A single point-in-time heart-rate measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub timestamp: DateTime<Utc>,
    pub heart_rate_bpm: f64,
}

/// Historical heart-rate series lookup.
#[async_trait::async_trait]
pub trait BiometricsProvider: Send + Sync {
    /// Samples recorded at or after `since`, oldest first. May be empty.
    async fn samples_since(&self, since: DateTime<Utc>) -> Result<Vec<HeartRateSample>>;
}

/// In-process sample buffer fed by whatever ingestion job the deployment
/// runs (wearable sync, debug endpoint). Bounded; oldest samples are
/// evicted once `capacity` is reached.
pub struct BiometricsLog {
    samples: Mutex<VecDeque<HeartRateSample>>,
    capacity: usize,
}

impl BiometricsLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, heart_rate_bpm: f64) {
        self.record_at(Utc::now(), heart_rate_bpm).await;
    }

    pub async fn record_at(&self, timestamp: DateTime<Utc>, heart_rate_bpm: f64) {
        let mut samples = self.samples.lock().await;
        samples.push_back(HeartRateSample {
            timestamp,
            heart_rate_bpm,
        });
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }
}

impl Default for BiometricsLog {
    fn default() -> Self {
        // One sample per 5s over a two-hour workout
        Self::new(1440)
    }
}

#[async_trait::async_trait]
impl BiometricsProvider for BiometricsLog {
    async fn samples_since(&self, since: DateTime<Utc>) -> Result<Vec<HeartRateSample>> {
        let samples = self.samples.lock().await;
        Ok(samples
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect())
    }
}
