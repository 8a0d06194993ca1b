use super::state::AppState;
use crate::error::SessionError;
use crate::session::{SessionCommands, StartRequest};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct SwitchExerciseRequest {
    pub exercise: Option<String>,

    /// Reset the running rep count for the new exercise
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct VoiceEventRequest {
    pub message: Option<String>,
    pub intent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VoiceTestRequest {
    pub utterance: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VoiceTestResponse {
    pub utterance: String,
    pub intent: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn session_error(err: &SessionError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match err {
        SessionError::NoActiveSession => (StatusCode::CONFLICT, "no_active_session".to_string()),
        SessionError::MissingField(field) => {
            (StatusCode::UNPROCESSABLE_ENTITY, format!("missing_{field}"))
        }
    };
    (status, Json(ErrorResponse { error: code }))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
/// Start a fresh session, or resume the paused one when the flags say so
pub async fn start_session(
    State(state): State<AppState>,
    payload: Option<Json<StartRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(r)| r).unwrap_or_default();

    match state.manager.start(request).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => session_error(&e).into_response(),
    }
}

/// POST /session/pause
/// Pause the running session; idempotent when already paused
pub async fn pause_session(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.pause().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => session_error(&e).into_response(),
    }
}

/// POST /session/stop
/// Stop the session and return its summary
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.stop().await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => session_error(&e).into_response(),
    }
}

/// POST /session/exercise
/// Select the active exercise, independent of session lifecycle
pub async fn switch_exercise(
    State(state): State<AppState>,
    payload: Option<Json<SwitchExerciseRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let exercise = request.exercise.unwrap_or_default();

    match state.manager.switch_exercise(&exercise, request.reset).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => session_error(&e).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub session: crate::session::StatusSnapshot,
    /// Live posture metrics, absent when the tracker is unreachable
    pub posture: Option<crate::posture::PostureReport>,
}

/// GET /session/status
/// Consistent session snapshot plus a best-effort posture report
pub async fn session_status(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.manager.status().await;
    let posture = state.posture.query().await.ok();
    (StatusCode::OK, Json(StatusResponse { session, posture }))
}

/// GET /session/recording
/// Posture time series recorded across the current session window
pub async fn session_recording(State(state): State<AppState>) -> impl IntoResponse {
    let samples = state.manager.recorder().samples().await;
    (StatusCode::OK, Json(samples))
}

/// POST /voice/event
/// Record a voice notice for UI pollers
pub async fn post_voice_event(
    State(state): State<AppState>,
    payload: Option<Json<VoiceEventRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let message = request.message.unwrap_or_default();

    match state
        .manager
        .record_voice_event(&message, request.intent.as_deref())
        .await
    {
        Ok(event) => (StatusCode::OK, Json(event)).into_response(),
        Err(e) => session_error(&e).into_response(),
    }
}

/// POST /voice/test
/// Device-less utterance-to-intent mapping check
pub async fn voice_test(
    State(state): State<AppState>,
    payload: Option<Json<VoiceTestRequest>>,
) -> impl IntoResponse {
    let utterance = payload
        .and_then(|Json(r)| r.utterance)
        .unwrap_or_default();
    if utterance.trim().is_empty() {
        return session_error(&SessionError::MissingField("utterance")).into_response();
    }

    match state.phrases.map(&utterance) {
        Some(intent) => {
            info!(%utterance, intent = intent.as_str(), "Voice test mapped");
            (
                StatusCode::OK,
                Json(VoiceTestResponse {
                    utterance,
                    intent: intent.as_str().to_string(),
                }),
            )
                .into_response()
        }
        None => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: "unknown_intent".to_string(),
            }),
        )
            .into_response(),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
