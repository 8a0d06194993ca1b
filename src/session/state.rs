use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::SessionError;

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Active,
    Paused,
}

/// Most recent voice event, kept for UI pollers. The sequence number is
/// strictly monotonic so a poller can detect new events without gaps.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceEvent {
    pub message: String,
    pub intent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

/// Name and timestamp of the last accepted command. Observability only.
#[derive(Debug, Clone, Serialize)]
pub struct CommandStamp {
    pub name: String,
    pub at: DateTime<Utc>,
}

/// Summary produced exactly once per Stop transition.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub duration_total_secs: f64,
    pub duration_active_secs: f64,
    pub total_reps: u32,
    pub rep_breakdown: HashMap<String, u32>,
    pub avg_quality: f64,
}

/// Consistent read-only view of the session state. Durations are computed
/// live at snapshot time, folding the open active interval if any.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: SessionStatus,
    pub session_id: Option<Uuid>,
    pub exercise: String,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_total_secs: f64,
    pub duration_active_secs: f64,
    pub last_command: Option<CommandStamp>,
    pub last_summary: Option<SessionSummary>,
    pub voice_event: Option<VoiceEvent>,
}

/// The single process-wide session record.
///
/// All methods take `now` explicitly so transition arithmetic stays
/// deterministic under test; the manager supplies wall-clock time and is
/// the only mutator. Invariant: `active_since` is `Some` exactly while
/// `status == Active`, and `active_accumulated` only grows, folded in at
/// every Pause or Stop with the delta clamped to zero against clock skew.
pub struct SessionState {
    status: SessionStatus,
    session_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    active_accumulated: Duration,
    active_since: Option<DateTime<Utc>>,
    current_exercise: String,
    last_command: Option<CommandStamp>,
    last_summary: Option<SessionSummary>,
    voice_event: Option<VoiceEvent>,
    voice_sequence: u64,
}

impl SessionState {
    pub fn new(default_exercise: &str) -> Self {
        Self {
            status: SessionStatus::Idle,
            session_id: None,
            started_at: None,
            active_accumulated: Duration::ZERO,
            active_since: None,
            current_exercise: default_exercise.to_lowercase(),
            last_command: None,
            last_summary: None,
            voice_event: None,
            voice_sequence: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// A session "exists" while this is `Some`, whatever the status.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn current_exercise(&self) -> &str {
        &self.current_exercise
    }

    /// Whether a start request should resume the paused session instead of
    /// opening a fresh one.
    pub fn resumes(&self, resume: bool, reset_totals: bool) -> bool {
        self.status == SessionStatus::Paused && (resume || !reset_totals)
    }

    /// Begin a fresh session, discarding any prior lifecycle state.
    pub fn begin(&mut self, now: DateTime<Utc>, exercise: Option<&str>) -> Uuid {
        let session_id = Uuid::new_v4();
        self.status = SessionStatus::Active;
        self.session_id = Some(session_id);
        self.started_at = Some(now);
        self.active_since = Some(now);
        self.active_accumulated = Duration::ZERO;
        if let Some(exercise) = exercise {
            self.current_exercise = exercise.to_lowercase();
        }
        self.last_summary = None;
        session_id
    }

    /// Resume the paused session, keeping accumulated totals and exercise.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.status = SessionStatus::Active;
        self.active_since = Some(now);
        self.last_summary = None;
    }

    /// Fold the open active interval into the accumulated total. Clock
    /// skew can make the delta negative; `to_std` maps that to zero.
    fn fold_active(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.active_since.take() {
            self.active_accumulated += now
                .signed_duration_since(since)
                .to_std()
                .unwrap_or_default();
        }
    }

    /// Transition to Paused. Returns `true` when the state changed,
    /// `false` when the session was already paused.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<bool, SessionError> {
        if self.started_at.is_none() {
            return Err(SessionError::NoActiveSession);
        }
        if self.status == SessionStatus::Paused {
            return Ok(false);
        }
        self.fold_active(now);
        self.status = SessionStatus::Paused;
        Ok(true)
    }

    /// Close the session: fold the open interval, build the summary, and
    /// reset every lifecycle field to Idle defaults. The summary is also
    /// stored as `last_summary` in the same step so no reader can observe
    /// a stopped session without it.
    pub fn finish(
        &mut self,
        now: DateTime<Utc>,
        total_reps: u32,
        rep_breakdown: HashMap<String, u32>,
        avg_quality: f64,
    ) -> Result<SessionSummary, SessionError> {
        let started_at = self.started_at.ok_or(SessionError::NoActiveSession)?;
        let session_id = self.session_id.unwrap_or_else(Uuid::new_v4);

        self.fold_active(now);
        let duration_total = now
            .signed_duration_since(started_at)
            .to_std()
            .unwrap_or_default();

        let summary = SessionSummary {
            session_id,
            duration_total_secs: duration_total.as_secs_f64(),
            duration_active_secs: self.active_accumulated.as_secs_f64(),
            total_reps,
            rep_breakdown,
            avg_quality,
        };

        self.status = SessionStatus::Idle;
        self.session_id = None;
        self.started_at = None;
        self.active_accumulated = Duration::ZERO;
        self.active_since = None;
        self.last_summary = Some(summary.clone());

        Ok(summary)
    }

    pub fn set_exercise(&mut self, exercise: &str) {
        self.current_exercise = exercise.to_lowercase();
    }

    pub fn note_command(&mut self, name: &str, now: DateTime<Utc>) {
        self.last_command = Some(CommandStamp {
            name: name.to_string(),
            at: now,
        });
    }

    pub fn record_voice_event(
        &mut self,
        message: &str,
        intent: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<VoiceEvent, SessionError> {
        if message.trim().is_empty() {
            return Err(SessionError::MissingField("message"));
        }
        self.voice_sequence += 1;
        let event = VoiceEvent {
            message: message.to_string(),
            intent: intent.map(str::to_string),
            timestamp: now,
            sequence: self.voice_sequence,
        };
        self.voice_event = Some(event.clone());
        Ok(event)
    }

    /// Live durations without mutating the open interval.
    fn durations_at(&self, now: DateTime<Utc>) -> (Duration, Duration) {
        let total = self
            .started_at
            .map(|s| now.signed_duration_since(s).to_std().unwrap_or_default())
            .unwrap_or(Duration::ZERO);
        let open = self
            .active_since
            .map(|s| now.signed_duration_since(s).to_std().unwrap_or_default())
            .unwrap_or(Duration::ZERO);
        (total, self.active_accumulated + open)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StatusSnapshot {
        let (total, active) = self.durations_at(now);
        StatusSnapshot {
            status: self.status,
            session_id: self.session_id,
            exercise: self.current_exercise.clone(),
            started_at: self.started_at,
            duration_total_secs: total.as_secs_f64(),
            duration_active_secs: active.as_secs_f64(),
            last_command: self.last_command.clone(),
            last_summary: self.last_summary.clone(),
            voice_event: self.voice_event.clone(),
        }
    }
}
