//! Session lifecycle and command coordination
//!
//! This module owns the one piece of process-wide mutable state in the
//! service:
//! - `SessionState` - lifecycle status, timestamps, accumulated active time
//! - `SessionManager` - the command gateway serializing all mutation
//! - `SessionRecorder` - fixed-rate posture sampling across the session

mod manager;
mod recorder;
mod state;

pub use manager::{SessionCommands, SessionManager, SessionSettings, StartRequest, StopOutcome};
pub use recorder::{PostureSample, SessionRecorder};
pub use state::{
    CommandStamp, SessionState, SessionStatus, SessionSummary, StatusSnapshot, VoiceEvent,
};
