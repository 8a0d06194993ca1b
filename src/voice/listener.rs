use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::audio::{AudioSource, BlockQueue, Microphone, MicrophoneConfig};
use super::decoder::{DecoderFactory, SpeechDecoder};
use super::intent::{Intent, PhraseMap};
use crate::error::VoiceError;
use crate::session::{SessionCommands, SessionStatus, StartRequest};

/// How long a single queue read waits before re-checking the stop flag.
const QUEUE_WAIT: Duration = Duration::from_millis(100);

/// How long `stop()` waits for the consumer loop before abandoning it.
const CONSUMER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Listener configuration, frozen for the lifetime of one run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub enabled: bool,
    /// Input device index; `None` selects the host default.
    pub device: Option<usize>,
    pub sample_rate: u32,
    /// Requested audio callback block size in frames.
    pub block_size: u32,
    /// Seconds of silence after which a partial hypothesis is discarded.
    pub silence_window_secs: f64,
    /// Minimum seconds between two triggers of the same intent.
    pub dedupe_seconds: f64,
    /// Minimum seconds between "say start first" reminders.
    pub reminder_seconds: f64,
    /// Exercises cycled through by voice start/next commands.
    pub rotation: Vec<String>,
    /// Bounded audio queue capacity, in blocks.
    pub queue_capacity: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: None,
            sample_rate: 16_000,
            block_size: 8_000,
            silence_window_secs: 1.0,
            dedupe_seconds: 2.0,
            reminder_seconds: 2.0,
            rotation: vec![
                "squat".to_string(),
                "pushup".to_string(),
                "crunch".to_string(),
            ],
            queue_capacity: 64,
        }
    }
}

/// Voice command listener: an audio ingestion loop on its own thread of
/// control that converts finalized utterances into session commands.
///
/// Lifecycle is Stopped -> Running and back; a failed `start()` logs the
/// cause and leaves the listener Stopped with no retry loop. Once running,
/// per-utterance failures (unknown text, command errors) never stop it.
pub struct VoiceListener {
    config: VoiceConfig,
    commands: Arc<dyn SessionCommands>,
    factory: Arc<dyn DecoderFactory>,
    phrases: Arc<PhraseMap>,
    source: Mutex<Box<dyn AudioSource>>,
    running: Arc<AtomicBool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceListener {
    pub fn new(
        config: VoiceConfig,
        commands: Arc<dyn SessionCommands>,
        factory: Arc<dyn DecoderFactory>,
    ) -> Self {
        let mic = Microphone::new(MicrophoneConfig {
            device: config.device,
            sample_rate: config.sample_rate,
            block_size: config.block_size,
        });
        Self::with_source(config, commands, factory, Box::new(mic))
    }

    /// Build against an arbitrary audio source instead of the microphone.
    pub fn with_source(
        config: VoiceConfig,
        commands: Arc<dyn SessionCommands>,
        factory: Arc<dyn DecoderFactory>,
        source: Box<dyn AudioSource>,
    ) -> Self {
        Self {
            config,
            commands,
            factory,
            phrases: Arc::new(PhraseMap::default()),
            source: Mutex::new(source),
            running: Arc::new(AtomicBool::new(false)),
            consumer: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Open the audio stream, build the decoder, and begin consuming.
    /// Any unavailable dependency leaves the listener Stopped; the error
    /// is returned for the caller's log and nothing retries internally.
    pub async fn start(&self) -> Result<(), VoiceError> {
        let mut consumer = self.consumer.lock().await;
        if consumer.is_some() {
            return Ok(());
        }

        let queue = Arc::new(BlockQueue::new(self.config.queue_capacity));
        let mut source = self.source.lock().await;
        let sample_rate = match source.start(Arc::clone(&queue)) {
            Ok(rate) => rate,
            Err(e) => {
                warn!("Voice listener not started: {e}");
                return Err(e);
            }
        };

        // Decoder creation failure is fatal for start() only; close the
        // stream again and stay Stopped.
        let decoder = match self.factory.create(sample_rate) {
            Ok(decoder) => decoder,
            Err(e) => {
                source.stop();
                warn!("Voice listener not started: {e}");
                return Err(e);
            }
        };

        self.running.store(true, Ordering::Release);
        let task = tokio::spawn(consume_blocks(
            self.config.clone(),
            Arc::clone(&self.commands),
            Arc::clone(&self.phrases),
            queue,
            decoder,
            Arc::clone(&self.running),
            sample_rate,
        ));
        *consumer = Some(task);

        info!(
            sample_rate,
            dedupe_seconds = self.config.dedupe_seconds,
            "Voice listener running"
        );
        Ok(())
    }

    /// Signal the consumer to exit, wait briefly for it, and close the
    /// audio stream whether or not the loop exited cleanly.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let handle = self.consumer.lock().await.take();
        if let Some(mut task) = handle {
            if tokio::time::timeout(CONSUMER_STOP_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!("Voice consumer did not exit in time");
                task.abort();
            }
        }

        self.source.lock().await.stop();
        info!("Voice listener stopped");
    }
}

/// Per-run dispatch state: rotation position, duplicate suppression, and
/// reminder rate limiting.
struct DispatchState {
    rotation: Vec<String>,
    cycle_index: usize,
    last_intent: Option<(Intent, Instant)>,
    last_reminder: Option<Instant>,
}

impl DispatchState {
    fn new(rotation: Vec<String>) -> Self {
        let rotation = if rotation.is_empty() {
            VoiceConfig::default().rotation
        } else {
            rotation
        };
        Self {
            rotation,
            cycle_index: 0,
            last_intent: None,
            last_reminder: None,
        }
    }

    /// Current rotation entry, advancing the cursor for the next call.
    fn next_exercise(&mut self) -> String {
        let exercise = self.rotation[self.cycle_index].clone();
        self.cycle_index = (self.cycle_index + 1) % self.rotation.len();
        exercise
    }
}

async fn consume_blocks(
    config: VoiceConfig,
    commands: Arc<dyn SessionCommands>,
    phrases: Arc<PhraseMap>,
    queue: Arc<BlockQueue>,
    mut decoder: Box<dyn SpeechDecoder>,
    running: Arc<AtomicBool>,
    sample_rate: u32,
) {
    let mut dispatch = DispatchState::new(config.rotation.clone());
    let mut silence_secs = 0.0_f64;

    while running.load(Ordering::Acquire) {
        let Some(block) = queue.recv(QUEUE_WAIT).await else {
            continue;
        };

        match decoder.accept_block(&block) {
            Some(text) => {
                silence_secs = 0.0;
                let text = text.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                info!(%text, "Utterance recognized");
                match phrases.map(&text) {
                    Some(intent) => {
                        handle_intent(intent, &config, &commands, &mut dispatch).await;
                    }
                    None => info!(%text, "No intent mapped for utterance"),
                }
            }
            None => {
                silence_secs += block.len() as f64 / sample_rate as f64;
                if silence_secs >= config.silence_window_secs {
                    decoder.reset();
                    silence_secs = 0.0;
                }
            }
        }
    }

    if queue.dropped() > 0 {
        warn!(dropped = queue.dropped(), "Audio blocks were dropped to backpressure");
    }
}

async fn handle_intent(
    intent: Intent,
    config: &VoiceConfig,
    commands: &Arc<dyn SessionCommands>,
    dispatch: &mut DispatchState,
) {
    // Duplicate suppression: the same intent within the dedupe window is
    // dropped before it reaches the gateway.
    if let Some((last, at)) = dispatch.last_intent {
        if last == intent && at.elapsed().as_secs_f64() < config.dedupe_seconds {
            debug!(intent = intent.as_str(), "Duplicate intent suppressed");
            return;
        }
    }

    // Session gating: everything except start/stop needs a session.
    if intent.requires_session() {
        let snapshot = commands.status().await;
        if snapshot.status == SessionStatus::Idle {
            let due = dispatch
                .last_reminder
                .map_or(true, |at| at.elapsed().as_secs_f64() >= config.reminder_seconds);
            if due {
                dispatch.last_reminder = Some(Instant::now());
                info!(intent = intent.as_str(), "Intent dropped, no active session");
                notify(commands, "Say \"start\" to begin a session", None).await;
            }
            return;
        }
    }

    dispatch.last_intent = Some((intent, Instant::now()));

    match intent {
        Intent::Start | Intent::StartRoutine => {
            if intent == Intent::StartRoutine {
                dispatch.cycle_index = 0;
            }
            let exercise = dispatch.next_exercise();
            notify(commands, &format!("Starting {exercise}"), Some(intent)).await;
            if let Err(e) = commands
                .start(StartRequest {
                    exercise: Some(exercise),
                    reset_totals: true,
                    resume: false,
                })
                .await
            {
                warn!("Voice start failed: {e}");
            }
        }
        Intent::Next => {
            let exercise = dispatch.next_exercise();
            notify(commands, &format!("Switching to {exercise}"), Some(intent)).await;
            if let Err(e) = commands.switch_exercise(&exercise, true).await {
                warn!("Voice exercise switch failed: {e}");
            }
        }
        Intent::Pause => {
            notify(commands, "Pausing session", Some(intent)).await;
            if let Err(e) = commands.pause().await {
                warn!("Voice pause failed: {e}");
            }
        }
        Intent::Stop => {
            notify(commands, "Stopping session", Some(intent)).await;
            if let Err(e) = commands.stop().await {
                warn!("Voice stop failed: {e}");
            }
        }
    }
}

/// Post a human-readable notice to the session store for UI display.
/// Independent of whether the command behind it succeeds.
async fn notify(commands: &Arc<dyn SessionCommands>, message: &str, intent: Option<Intent>) {
    if let Err(e) = commands
        .record_voice_event(message, intent.map(|i| i.as_str()))
        .await
    {
        warn!("Voice event not recorded: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::session::{StatusSnapshot, StopOutcome, VoiceEvent};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Records every gateway call; reports a configurable session status.
    struct RecordingCommands {
        status: StdMutex<SessionStatus>,
        calls: StdMutex<Vec<String>>,
    }

    impl RecordingCommands {
        fn new(status: SessionStatus) -> Arc<Self> {
            Arc::new(Self {
                status: StdMutex::new(status),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn snapshot(&self) -> StatusSnapshot {
            StatusSnapshot {
                status: *self.status.lock().unwrap(),
                session_id: None,
                exercise: "squat".to_string(),
                started_at: None,
                duration_total_secs: 0.0,
                duration_active_secs: 0.0,
                last_command: None,
                last_summary: None,
                voice_event: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl SessionCommands for RecordingCommands {
        async fn start(&self, request: StartRequest) -> Result<StatusSnapshot, SessionError> {
            self.record(format!(
                "start:{}",
                request.exercise.as_deref().unwrap_or("-")
            ));
            *self.status.lock().unwrap() = SessionStatus::Active;
            Ok(self.snapshot())
        }

        async fn pause(&self) -> Result<StatusSnapshot, SessionError> {
            self.record("pause".to_string());
            Ok(self.snapshot())
        }

        async fn stop(&self) -> Result<StopOutcome, SessionError> {
            self.record("stop".to_string());
            *self.status.lock().unwrap() = SessionStatus::Idle;
            Err(SessionError::NoActiveSession)
        }

        async fn switch_exercise(
            &self,
            exercise: &str,
            _reset: bool,
        ) -> Result<StatusSnapshot, SessionError> {
            self.record(format!("switch:{exercise}"));
            Ok(self.snapshot())
        }

        async fn status(&self) -> StatusSnapshot {
            self.snapshot()
        }

        async fn record_voice_event(
            &self,
            message: &str,
            _intent: Option<&str>,
        ) -> Result<VoiceEvent, SessionError> {
            self.record(format!("notify:{message}"));
            Ok(VoiceEvent {
                message: message.to_string(),
                intent: None,
                timestamp: Utc::now(),
                sequence: 1,
            })
        }
    }

    fn config(dedupe: f64, reminder: f64) -> VoiceConfig {
        VoiceConfig {
            dedupe_seconds: dedupe,
            reminder_seconds: reminder,
            ..VoiceConfig::default()
        }
    }

    fn gateway_calls(calls: &[String]) -> Vec<&String> {
        calls.iter().filter(|c| !c.starts_with("notify:")).collect()
    }

    #[tokio::test]
    async fn test_duplicate_intent_suppressed_inside_window() {
        let commands = RecordingCommands::new(SessionStatus::Active);
        let sink: Arc<dyn SessionCommands> = commands.clone();
        let cfg = config(10.0, 2.0);
        let mut dispatch = DispatchState::new(cfg.rotation.clone());

        handle_intent(Intent::Pause, &cfg, &sink, &mut dispatch).await;
        handle_intent(Intent::Pause, &cfg, &sink, &mut dispatch).await;

        let calls = commands.calls();
        assert_eq!(
            gateway_calls(&calls),
            vec!["pause"],
            "second pause inside the dedupe window must not reach the gateway"
        );
    }

    #[tokio::test]
    async fn test_duplicate_intent_triggers_again_after_window() {
        let commands = RecordingCommands::new(SessionStatus::Active);
        let sink: Arc<dyn SessionCommands> = commands.clone();
        let cfg = config(0.05, 2.0);
        let mut dispatch = DispatchState::new(cfg.rotation.clone());

        handle_intent(Intent::Pause, &cfg, &sink, &mut dispatch).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle_intent(Intent::Pause, &cfg, &sink, &mut dispatch).await;

        let calls = commands.calls();
        assert_eq!(gateway_calls(&calls), vec!["pause", "pause"]);
    }

    #[tokio::test]
    async fn test_gated_intent_drops_and_rate_limits_reminder() {
        let commands = RecordingCommands::new(SessionStatus::Idle);
        let sink: Arc<dyn SessionCommands> = commands.clone();
        let cfg = config(0.0, 10.0);
        let mut dispatch = DispatchState::new(cfg.rotation.clone());

        for _ in 0..5 {
            handle_intent(Intent::Next, &cfg, &sink, &mut dispatch).await;
        }

        let calls = commands.calls();
        assert!(gateway_calls(&calls).is_empty(), "no switch may reach the gateway");
        assert_eq!(dispatch.cycle_index, 0, "rotation must not advance while gated");
        let reminders = calls.iter().filter(|c| c.contains("start")).count();
        assert_eq!(reminders, 1, "exactly one reminder per rate-limit window");
    }

    #[tokio::test]
    async fn test_start_is_always_allowed_and_cycles_rotation() {
        let commands = RecordingCommands::new(SessionStatus::Idle);
        let sink: Arc<dyn SessionCommands> = commands.clone();
        let cfg = config(0.0, 2.0);
        let mut dispatch = DispatchState::new(cfg.rotation.clone());

        handle_intent(Intent::Start, &cfg, &sink, &mut dispatch).await;
        handle_intent(Intent::Next, &cfg, &sink, &mut dispatch).await;
        handle_intent(Intent::Next, &cfg, &sink, &mut dispatch).await;

        let calls = commands.calls();
        assert_eq!(
            gateway_calls(&calls),
            vec!["start:squat", "switch:pushup", "switch:crunch"]
        );
    }

    #[tokio::test]
    async fn test_start_routine_resets_rotation() {
        let commands = RecordingCommands::new(SessionStatus::Active);
        let sink: Arc<dyn SessionCommands> = commands.clone();
        let cfg = config(0.0, 2.0);
        let mut dispatch = DispatchState::new(cfg.rotation.clone());

        handle_intent(Intent::Next, &cfg, &sink, &mut dispatch).await;
        handle_intent(Intent::Next, &cfg, &sink, &mut dispatch).await;
        handle_intent(Intent::StartRoutine, &cfg, &sink, &mut dispatch).await;

        let calls = commands.calls();
        assert_eq!(
            gateway_calls(&calls),
            vec!["switch:squat", "switch:pushup", "start:squat"]
        );
    }

    #[tokio::test]
    async fn test_command_failure_does_not_stop_dispatch() {
        let commands = RecordingCommands::new(SessionStatus::Active);
        let sink: Arc<dyn SessionCommands> = commands.clone();
        let cfg = config(0.0, 2.0);
        let mut dispatch = DispatchState::new(cfg.rotation.clone());

        // The fake's stop always errors; the listener logs and keeps going
        handle_intent(Intent::Stop, &cfg, &sink, &mut dispatch).await;
        handle_intent(Intent::Start, &cfg, &sink, &mut dispatch).await;

        let calls = commands.calls();
        assert_eq!(gateway_calls(&calls), vec!["stop", "start:squat"]);
    }

    /// Scripted decoder: emits the queued outputs in order, one per block.
    struct ScriptedDecoder {
        outputs: StdMutex<std::collections::VecDeque<Option<String>>>,
    }

    impl SpeechDecoder for ScriptedDecoder {
        fn accept_block(&mut self, _samples: &[i16]) -> Option<String> {
            self.outputs.lock().unwrap().pop_front().flatten()
        }

        fn reset(&mut self) {}
    }

    struct ScriptedFactory {
        utterances: Vec<Option<String>>,
    }

    impl DecoderFactory for ScriptedFactory {
        fn create(&self, _sample_rate: u32) -> Result<Box<dyn SpeechDecoder>, VoiceError> {
            Ok(Box::new(ScriptedDecoder {
                outputs: StdMutex::new(self.utterances.clone().into()),
            }))
        }
    }

    /// Audio source that hands the queue to the test instead of hardware.
    struct LoopbackSource {
        queue: Arc<StdMutex<Option<Arc<BlockQueue>>>>,
        sample_rate: u32,
    }

    impl AudioSource for LoopbackSource {
        fn start(&mut self, queue: Arc<BlockQueue>) -> Result<u32, VoiceError> {
            *self.queue.lock().unwrap() = Some(queue);
            Ok(self.sample_rate)
        }

        fn stop(&mut self) {}
    }

    struct FailingFactory;

    impl DecoderFactory for FailingFactory {
        fn create(&self, _sample_rate: u32) -> Result<Box<dyn SpeechDecoder>, VoiceError> {
            Err(VoiceError::DecoderUnavailable("no model".to_string()))
        }
    }

    #[tokio::test]
    async fn test_listener_end_to_end_with_scripted_audio() {
        let commands = RecordingCommands::new(SessionStatus::Idle);
        let sink: Arc<dyn SessionCommands> = commands.clone();
        let queue_slot = Arc::new(StdMutex::new(None));

        let factory = Arc::new(ScriptedFactory {
            utterances: vec![
                Some("start".to_string()),
                None,
                Some("hold on".to_string()),
            ],
        });
        let source = Box::new(LoopbackSource {
            queue: Arc::clone(&queue_slot),
            sample_rate: 16_000,
        });

        let listener = VoiceListener::with_source(config(0.0, 2.0), sink, factory, source);
        listener.start().await.unwrap();
        assert!(listener.is_running());

        let queue = queue_slot.lock().unwrap().clone().unwrap();
        for _ in 0..3 {
            queue.push(vec![0; 160]);
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        listener.stop().await;
        assert!(!listener.is_running());

        let calls = commands.calls();
        assert_eq!(gateway_calls(&calls), vec!["start:squat", "pause"]);
    }

    #[tokio::test]
    async fn test_decoder_failure_leaves_listener_stopped() {
        let commands = RecordingCommands::new(SessionStatus::Idle);
        let sink: Arc<dyn SessionCommands> = commands.clone();
        let queue_slot = Arc::new(StdMutex::new(None));
        let source = Box::new(LoopbackSource {
            queue: Arc::clone(&queue_slot),
            sample_rate: 16_000,
        });

        let listener = VoiceListener::with_source(
            config(0.0, 2.0),
            sink,
            Arc::new(FailingFactory),
            source,
        );
        assert!(matches!(
            listener.start().await,
            Err(VoiceError::DecoderUnavailable(_))
        ));
        assert!(!listener.is_running());
    }
}
