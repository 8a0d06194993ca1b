//! Voice command ingestion
//!
//! Converts a live microphone stream into session commands:
//! - `audio` - cpal capture feeding a bounded drop-oldest block queue
//! - `decoder` - the pluggable speech decoding contract
//! - `intent` - utterance-to-intent synonym mapping
//! - `listener` - the consumer loop with dedupe, gating, and dispatch

mod audio;
mod decoder;
mod intent;
mod listener;

pub use audio::{AudioSource, BlockQueue, Microphone, MicrophoneConfig};
pub use decoder::{DecoderFactory, SpeechDecoder};
pub use intent::{Intent, PhraseMap};
pub use listener::{VoiceConfig, VoiceListener};
