//! HTTP API server for session control
//!
//! This module provides the REST surface over the command gateway:
//! - POST /session/start - Start or resume a session
//! - POST /session/pause - Pause the running session
//! - POST /session/stop - Stop and summarize
//! - POST /session/exercise - Select the active exercise
//! - GET /session/status - Session snapshot + posture metrics
//! - GET /session/recording - Posture time series
//! - POST /voice/event - Record a voice notice
//! - POST /voice/test - Device-less intent mapping check
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
