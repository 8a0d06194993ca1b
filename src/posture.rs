//! Posture inference collaborator contract.
//!
//! The vision pipeline itself lives outside this service; the session core
//! only needs a pull-style query for per-frame exercise metrics plus a few
//! control calls (exercise selection, counter resets, counting gate). The
//! in-process [`PostureHub`] is the integration point a pipeline feeds with
//! [`PostureHub::publish`]; everything downstream reads through the
//! [`PostureTracker`] trait.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Joint angles reported per frame, in degrees. Absent joints are `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JointAngles {
    pub left_knee: Option<f64>,
    pub right_knee: Option<f64>,
    pub left_elbow: Option<f64>,
    pub right_elbow: Option<f64>,
    pub left_hip: Option<f64>,
    pub right_hip: Option<f64>,
    pub shoulder_hip_alignment: Option<f64>,
}

/// Snapshot of the tracker's current exercise metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostureReport {
    /// Active exercise identifier (lowercase).
    pub exercise: String,
    /// Movement phase ("up" / "down").
    pub phase: String,
    /// Repetitions counted for the current exercise since the last reset.
    pub rep_count: u32,
    /// Lifetime repetition totals per exercise.
    pub rep_totals: HashMap<String, u32>,
    /// Form quality of the most recent frame (0.0 to 1.0).
    pub quality: f64,
    pub angles: JointAngles,
    /// Inference latency of the most recent frame.
    pub latency_ms: f64,
    /// Frames per second the pipeline is sustaining.
    pub fps: f64,
}

/// Per-frame metrics pushed by the vision pipeline.
#[derive(Debug, Clone, Default)]
pub struct FrameMetrics {
    /// Movement phase the pipeline resolved for this frame.
    pub phase: String,
    /// Whether this frame completed a repetition.
    pub rep_completed: bool,
    /// Form quality for this frame (0.0 to 1.0).
    pub quality: f64,
    pub angles: JointAngles,
    pub latency_ms: f64,
    pub fps: f64,
}

/// Pull-style contract the session core consumes.
#[async_trait::async_trait]
pub trait PostureTracker: Send + Sync {
    /// Current metrics snapshot.
    async fn query(&self) -> Result<PostureReport>;

    /// Select the active exercise; `reset` clears its running rep count.
    async fn set_exercise(&self, exercise: &str, reset: bool) -> Result<()>;

    /// Reset running session counters; `preserve_totals` keeps lifetime
    /// per-exercise totals.
    async fn reset_session(&self, preserve_totals: bool) -> Result<()>;

    /// Gate repetition counting without interrupting frame metrics.
    async fn set_counting_enabled(&self, enabled: bool) -> Result<()>;

    /// Mean form quality across all frames published since the last
    /// full reset.
    async fn average_quality(&self) -> Result<f64>;
}

struct HubInner {
    exercise: String,
    phase: String,
    rep_count: u32,
    rep_totals: HashMap<String, u32>,
    counting_enabled: bool,
    quality: f64,
    quality_sum: f64,
    quality_frames: u64,
    angles: JointAngles,
    latency_ms: f64,
    fps: f64,
}

/// In-process posture state shared between the vision pipeline (producer)
/// and the session core (consumer).
pub struct PostureHub {
    inner: Mutex<HubInner>,
}

impl PostureHub {
    pub fn new(exercise: &str) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                exercise: exercise.to_lowercase(),
                phase: "up".to_string(),
                rep_count: 0,
                rep_totals: HashMap::new(),
                counting_enabled: false,
                quality: 0.0,
                quality_sum: 0.0,
                quality_frames: 0,
                angles: JointAngles::default(),
                latency_ms: 0.0,
                fps: 0.0,
            }),
        }
    }

    /// Feed one frame's metrics. Repetitions only count while counting is
    /// enabled; frame metrics (angles, quality, latency) update regardless.
    pub async fn publish(&self, frame: FrameMetrics) {
        let mut inner = self.inner.lock().await;
        if !frame.phase.is_empty() {
            inner.phase = frame.phase;
        }
        if frame.rep_completed && inner.counting_enabled {
            inner.rep_count += 1;
            let exercise = inner.exercise.clone();
            *inner.rep_totals.entry(exercise).or_insert(0) += 1;
        }
        inner.quality = frame.quality;
        inner.quality_sum += frame.quality;
        inner.quality_frames += 1;
        inner.angles = frame.angles;
        inner.latency_ms = frame.latency_ms;
        inner.fps = frame.fps;
    }
}

#[async_trait::async_trait]
impl PostureTracker for PostureHub {
    async fn query(&self) -> Result<PostureReport> {
        let inner = self.inner.lock().await;
        Ok(PostureReport {
            exercise: inner.exercise.clone(),
            phase: inner.phase.clone(),
            rep_count: inner.rep_count,
            rep_totals: inner.rep_totals.clone(),
            quality: inner.quality,
            angles: inner.angles.clone(),
            latency_ms: inner.latency_ms,
            fps: inner.fps,
        })
    }

    async fn set_exercise(&self, exercise: &str, reset: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.exercise = exercise.to_lowercase();
        inner.phase = "up".to_string();
        if reset {
            inner.rep_count = 0;
        }
        debug!(exercise = %inner.exercise, reset, "exercise selected");
        Ok(())
    }

    async fn reset_session(&self, preserve_totals: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.rep_count = 0;
        inner.phase = "up".to_string();
        if !preserve_totals {
            inner.rep_totals.clear();
            inner.quality_sum = 0.0;
            inner.quality_frames = 0;
        }
        Ok(())
    }

    async fn set_counting_enabled(&self, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.counting_enabled = enabled;
        Ok(())
    }

    async fn average_quality(&self) -> Result<f64> {
        let inner = self.inner.lock().await;
        if inner.quality_frames == 0 {
            return Ok(0.0);
        }
        Ok(inner.quality_sum / inner.quality_frames as f64)
    }
}
