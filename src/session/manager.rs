use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::recorder::SessionRecorder;
use super::state::{SessionState, SessionSummary, StatusSnapshot, VoiceEvent};
use crate::biometrics::BiometricsProvider;
use crate::error::SessionError;
use crate::posture::PostureTracker;
use crate::storage::{MetricsStore, SessionRecord};

/// How long the recorder shutdown may take during session Stop.
const RECORDER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Tuning knobs for the session core, normally taken from the config file.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub default_exercise: String,
    /// Upper bound for any single collaborator call made from a session
    /// operation. Expiry degrades to a zero/empty fallback, never an error.
    pub collaborator_timeout: Duration,
    pub recorder_sample_hz: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_exercise: "squat".to_string(),
            collaborator_timeout: Duration::from_secs(5),
            recorder_sample_hz: 5.0,
        }
    }
}

/// Parameters of a Start command.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    /// Exercise to select for a fresh session; keeps the previous one
    /// when absent.
    #[serde(default)]
    pub exercise: Option<String>,
    /// Fresh sessions reset totals. Turning this off while paused makes
    /// Start behave as a resume.
    #[serde(default = "default_true")]
    pub reset_totals: bool,
    /// Explicitly resume a paused session.
    #[serde(default)]
    pub resume: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StartRequest {
    fn default() -> Self {
        Self {
            exercise: None,
            reset_totals: true,
            resume: false,
        }
    }
}

/// Result of a Stop command: the final summary plus the repetition
/// snapshot and heart-rate aggregates that went into the persisted record.
#[derive(Debug, Clone, Serialize)]
pub struct StopOutcome {
    pub summary: SessionSummary,
    pub rep_count: u32,
    pub rep_totals: HashMap<String, u32>,
    pub avg_hr: f64,
    pub max_hr: f64,
}

/// The session-control operations, addressable by both the HTTP surface
/// and the in-process voice listener.
#[async_trait::async_trait]
pub trait SessionCommands: Send + Sync {
    async fn start(&self, request: StartRequest) -> Result<StatusSnapshot, SessionError>;
    async fn pause(&self) -> Result<StatusSnapshot, SessionError>;
    async fn stop(&self) -> Result<StopOutcome, SessionError>;
    async fn switch_exercise(&self, exercise: &str, reset: bool)
        -> Result<StatusSnapshot, SessionError>;
    async fn status(&self) -> StatusSnapshot;
    async fn record_voice_event(
        &self,
        message: &str,
        intent: Option<&str>,
    ) -> Result<VoiceEvent, SessionError>;
}

/// Owner of the session state and the only mutator of it.
///
/// Every operation takes the single state lock for its transition, so
/// concurrent callers (HTTP and the voice listener) observe a total order.
/// Collaborator I/O happens outside the critical section; the lock only
/// ever guards in-memory work.
pub struct SessionManager {
    state: Arc<Mutex<SessionState>>,
    posture: Arc<dyn PostureTracker>,
    biometrics: Arc<dyn BiometricsProvider>,
    store: Arc<dyn MetricsStore>,
    recorder: Arc<SessionRecorder>,
    collaborator_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        settings: SessionSettings,
        posture: Arc<dyn PostureTracker>,
        biometrics: Arc<dyn BiometricsProvider>,
        store: Arc<dyn MetricsStore>,
    ) -> Self {
        let state = Arc::new(Mutex::new(SessionState::new(&settings.default_exercise)));
        let recorder = Arc::new(SessionRecorder::new(
            Arc::clone(&posture),
            settings.recorder_sample_hz,
            Arc::clone(&state),
        ));
        Self {
            state,
            posture,
            biometrics,
            store,
            recorder,
            collaborator_timeout: settings.collaborator_timeout,
        }
    }

    /// The posture sampling loop owned by this manager. Started on fresh
    /// session starts, stopped on session stop; pause leaves it running.
    pub fn recorder(&self) -> &Arc<SessionRecorder> {
        &self.recorder
    }

    /// Run a collaborator call with the configured timeout, degrading to
    /// `None` on failure or expiry. Nothing in the session path treats a
    /// collaborator problem as fatal.
    async fn best_effort<T, F>(&self, what: &str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.collaborator_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("{what} failed: {e:#}");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.collaborator_timeout, "{what} timed out");
                None
            }
        }
    }

    /// Mean and max heart rate over the session window, zeros when the
    /// provider has nothing or fails.
    async fn heart_rate_window(&self, since: DateTime<Utc>) -> (f64, f64) {
        let samples = self
            .best_effort("biometrics window query", self.biometrics.samples_since(since))
            .await
            .unwrap_or_default();
        if samples.is_empty() {
            return (0.0, 0.0);
        }
        let sum: f64 = samples.iter().map(|s| s.heart_rate_bpm).sum();
        let max = samples
            .iter()
            .map(|s| s.heart_rate_bpm)
            .fold(f64::MIN, f64::max);
        (sum / samples.len() as f64, max)
    }
}

#[async_trait::async_trait]
impl SessionCommands for SessionManager {
    /// Start never fails: a redundant call simply opens a fresh session
    /// (or resumes, when the paused state and flags say so) and returns
    /// the current view.
    async fn start(&self, request: StartRequest) -> Result<StatusSnapshot, SessionError> {
        let now = Utc::now();
        let exercise = request
            .exercise
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_lowercase);

        let (snapshot, resumed) = {
            let mut state = self.state.lock().await;
            if state.resumes(request.resume, request.reset_totals) {
                state.resume(now);
                state.note_command("start", now);
                (state.snapshot(now), true)
            } else {
                let session_id = state.begin(now, exercise.as_deref());
                state.note_command("start", now);
                info!(
                    session_id = %session_id,
                    exercise = state.current_exercise(),
                    "Session started"
                );
                (state.snapshot(now), false)
            }
        };

        if resumed {
            info!("Session resumed");
        } else {
            match &exercise {
                Some(name) => {
                    self.best_effort("posture exercise select", self.posture.set_exercise(name, true))
                        .await;
                }
                None => {
                    self.best_effort("posture session reset", self.posture.reset_session(true))
                        .await;
                }
            }
            self.recorder.start().await;
        }
        self.best_effort(
            "posture counting enable",
            self.posture.set_counting_enabled(true),
        )
        .await;

        Ok(snapshot)
    }

    async fn pause(&self) -> Result<StatusSnapshot, SessionError> {
        let now = Utc::now();
        let (snapshot, changed) = {
            let mut state = self.state.lock().await;
            let changed = state.pause(now)?;
            if changed {
                state.note_command("pause", now);
            }
            (state.snapshot(now), changed)
        };

        if changed {
            info!(
                duration_active_secs = snapshot.duration_active_secs,
                "Session paused"
            );
            // Frames keep flowing, reps stop counting
            self.best_effort(
                "posture counting disable",
                self.posture.set_counting_enabled(false),
            )
            .await;
        }

        Ok(snapshot)
    }

    async fn stop(&self) -> Result<StopOutcome, SessionError> {
        // Window snapshot first, then the best-effort external reads; the
        // transition itself stays a pure in-memory critical section.
        let started_at = {
            let state = self.state.lock().await;
            state.started_at().ok_or(SessionError::NoActiveSession)?
        };

        let (avg_hr, max_hr) = self.heart_rate_window(started_at).await;
        let report = self.best_effort("posture query", self.posture.query()).await;
        let avg_quality = self
            .best_effort("posture quality average", self.posture.average_quality())
            .await
            .unwrap_or(0.0);
        let (rep_count, rep_totals) = report
            .map(|r| (r.rep_count, r.rep_totals))
            .unwrap_or_default();
        let total_reps = if rep_totals.is_empty() {
            rep_count
        } else {
            rep_totals.values().sum()
        };

        let now = Utc::now();
        let summary = {
            let mut state = self.state.lock().await;
            // The session may have been stopped, or replaced by a fresh
            // one, while the external reads ran; only close the session
            // this call observed.
            if state.started_at() != Some(started_at) {
                return Err(SessionError::NoActiveSession);
            }
            let summary = state.finish(now, total_reps, rep_totals.clone(), avg_quality)?;
            state.note_command("stop", now);
            summary
        };

        info!(
            session_id = %summary.session_id,
            duration_total_secs = summary.duration_total_secs,
            duration_active_secs = summary.duration_active_secs,
            total_reps = summary.total_reps,
            "Session stopped"
        );

        self.best_effort("posture session reset", self.posture.reset_session(false))
            .await;
        self.best_effort(
            "posture counting disable",
            self.posture.set_counting_enabled(false),
        )
        .await;
        self.recorder.stop(RECORDER_STOP_TIMEOUT).await;

        let record = SessionRecord {
            session_id: summary.session_id,
            started_at,
            duration_secs: summary.duration_total_secs,
            duration_active_secs: summary.duration_active_secs,
            avg_hr,
            max_hr,
            avg_quality,
            total_reps,
            rep_breakdown: rep_totals.clone(),
        };
        if self
            .best_effort("session metrics persist", self.store.record_session_metrics(&record))
            .await
            .is_none()
        {
            warn!(session_id = %record.session_id, "Session metrics were not persisted");
        }

        Ok(StopOutcome {
            summary,
            rep_count,
            rep_totals,
            avg_hr,
            max_hr,
        })
    }

    async fn switch_exercise(
        &self,
        exercise: &str,
        reset: bool,
    ) -> Result<StatusSnapshot, SessionError> {
        let name = exercise.trim().to_lowercase();
        if name.is_empty() {
            return Err(SessionError::MissingField("exercise"));
        }

        let now = Utc::now();
        let snapshot = {
            let mut state = self.state.lock().await;
            state.set_exercise(&name);
            state.note_command("exercise", now);
            state.snapshot(now)
        };

        info!(exercise = %name, reset, "Exercise switched");
        self.best_effort("posture exercise select", self.posture.set_exercise(&name, reset))
            .await;

        Ok(snapshot)
    }

    async fn status(&self) -> StatusSnapshot {
        let state = self.state.lock().await;
        state.snapshot(Utc::now())
    }

    async fn record_voice_event(
        &self,
        message: &str,
        intent: Option<&str>,
    ) -> Result<VoiceEvent, SessionError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        state.record_voice_event(message, intent, now)
    }
}
