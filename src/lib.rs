pub mod biometrics;
pub mod config;
pub mod error;
pub mod http;
pub mod posture;
pub mod session;
pub mod storage;
pub mod voice;

pub use biometrics::{BiometricsLog, BiometricsProvider, HeartRateSample};
pub use config::Config;
pub use error::{SessionError, VoiceError};
pub use http::{create_router, AppState};
pub use posture::{FrameMetrics, JointAngles, PostureHub, PostureReport, PostureTracker};
pub use session::{
    PostureSample, SessionCommands, SessionManager, SessionRecorder, SessionSettings,
    SessionStatus, SessionSummary, StartRequest, StatusSnapshot, StopOutcome, VoiceEvent,
};
pub use storage::{JsonlMetricsStore, MetricsStore, SessionRecord};
pub use voice::{
    AudioSource, BlockQueue, DecoderFactory, Intent, Microphone, MicrophoneConfig, PhraseMap,
    SpeechDecoder, VoiceConfig, VoiceListener,
};
