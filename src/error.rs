use thiserror::Error;

/// Caller-visible session lifecycle errors.
///
/// Every other failure in the session path (biometrics lookups, posture
/// queries, persistence writes) is absorbed with a logged fallback and
/// never reaches the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Pause or Stop was requested while no session has been started.
    #[error("no active session")]
    NoActiveSession,

    /// A command payload is missing a required field.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// Voice listener startup errors.
///
/// These are only produced by `VoiceListener::start()`; once the listener
/// is running, failures are logged and the loop keeps going.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// No usable audio input device after exhausting all fallbacks.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The speech decoder could not be constructed.
    #[error("speech decoder unavailable: {0}")]
    DecoderUnavailable(String),
}
