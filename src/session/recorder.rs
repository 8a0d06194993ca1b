use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::{SessionState, SessionStatus};
use crate::posture::{JointAngles, PostureTracker};

/// Sampling rates below this would make the exported series useless.
const MIN_SAMPLE_HZ: f64 = 0.5;

/// How long a single posture query may take before the tick is skipped.
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// One point of the posture time series.
///
/// `t` is seconds since the recorder started, from the monotonic clock.
/// `status` tags the session lifecycle state at sample time so exporters
/// can tell paused stretches apart from active ones.
#[derive(Debug, Clone, Serialize)]
pub struct PostureSample {
    pub t: f64,
    pub angle: Option<f64>,
    pub rep_count: u32,
    pub is_rep: bool,
    pub latency_ms: f64,
    pub fps: f64,
    pub status: SessionStatus,
}

/// Fixed-rate posture sampling loop spanning a session window.
///
/// Runs independently of session bookkeeping: Pause does not stop it, so
/// paused intervals stay visible in the exported series. Only an explicit
/// `stop()` (issued by the session manager on Stop) halts the loop.
pub struct SessionRecorder {
    posture: Arc<dyn PostureTracker>,
    state: Arc<Mutex<SessionState>>,
    sample_hz: f64,
    samples: Arc<Mutex<Vec<PostureSample>>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRecorder {
    pub(crate) fn new(
        posture: Arc<dyn PostureTracker>,
        sample_hz: f64,
        state: Arc<Mutex<SessionState>>,
    ) -> Self {
        Self {
            posture,
            state,
            sample_hz: sample_hz.max(MIN_SAMPLE_HZ),
            samples: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear prior samples and begin the sampling loop. No-op while a loop
    /// is already running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.samples.lock().await.clear();

        let posture = Arc::clone(&self.posture);
        let state = Arc::clone(&self.state);
        let samples = Arc::clone(&self.samples);
        let running = Arc::clone(&self.running);
        let sample_hz = self.sample_hz;

        let task = tokio::spawn(async move {
            info!(sample_hz, "Posture recorder started");
            run_loop(posture, state, samples, running, sample_hz).await;
            info!("Posture recorder stopped");
        });

        *self.handle.lock().await = Some(task);
    }

    /// Signal the loop to end and wait up to `timeout` for a clean exit.
    /// Proceeds either way so a larger shutdown sequence never hangs here.
    pub async fn stop(&self, timeout: Duration) {
        self.running.store(false, Ordering::Release);
        let handle = self.handle.lock().await.take();
        if let Some(mut task) = handle {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!(?timeout, "Posture recorder did not exit in time");
                task.abort();
            }
        }
    }

    /// Snapshot of the recorded series, oldest first.
    pub async fn samples(&self) -> Vec<PostureSample> {
        self.samples.lock().await.clone()
    }
}

async fn run_loop(
    posture: Arc<dyn PostureTracker>,
    state: Arc<Mutex<SessionState>>,
    samples: Arc<Mutex<Vec<PostureSample>>>,
    running: Arc<AtomicBool>,
    sample_hz: f64,
) {
    let tick = Duration::from_secs_f64(1.0 / sample_hz);
    let origin = Instant::now();
    let mut last_rep: Option<u32> = None;

    while running.load(Ordering::Acquire) {
        let tick_start = Instant::now();

        // A failed or slow query skips this tick; the loop never dies on a
        // single bad read.
        let report = match tokio::time::timeout(QUERY_TIMEOUT, posture.query()).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                debug!("Posture query failed, skipping sample: {e:#}");
                None
            }
            Err(_) => {
                debug!("Posture query timed out, skipping sample");
                None
            }
        };

        if let Some(report) = report {
            let angle = primary_angle(&report.exercise, &report.angles);
            let is_rep = last_rep.is_some_and(|prev| report.rep_count > prev);
            last_rep = Some(report.rep_count);
            let status = state.lock().await.status();
            samples.lock().await.push(PostureSample {
                t: tick_start.duration_since(origin).as_secs_f64(),
                angle,
                rep_count: report.rep_count,
                is_rep,
                latency_ms: report.latency_ms,
                fps: report.fps,
                status,
            });
        }

        // Sleep only the remaining tick budget; an overrunning query moves
        // straight to the next tick without compounding delay.
        let elapsed = tick_start.elapsed();
        if elapsed < tick {
            tokio::time::sleep(tick - elapsed).await;
        }
    }
}

/// The one representative joint angle tracked per exercise: knees for
/// squats, elbows for pushups, hips for crunches with shoulder-hip
/// alignment as the fallback when hip angles are unavailable.
fn primary_angle(exercise: &str, angles: &JointAngles) -> Option<f64> {
    match exercise {
        "squat" => mean_of(&[angles.left_knee, angles.right_knee]),
        "pushup" => mean_of(&[angles.left_elbow, angles.right_elbow]),
        _ => mean_of(&[angles.left_hip, angles.right_hip]).or(angles.shoulder_hip_alignment),
    }
}

fn mean_of(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}
