//! Speech decoding collaborator contract.
//!
//! Decoding is external to this service: a backend consumes 16-bit mono
//! PCM blocks and performs its own utterance endpointing, handing back
//! finalized text when it decides an utterance has ended. No acoustic
//! backend ships in this crate; deployments plug one in through
//! [`DecoderFactory`], and the listener stays stopped when none is
//! available.

use crate::error::VoiceError;

/// Streaming speech decoder. One instance per listener run, driven from
/// the consumer thread only.
pub trait SpeechDecoder: Send {
    /// Feed one block of mono PCM. Returns finalized utterance text when
    /// the decoder's endpointing closed an utterance on this block.
    fn accept_block(&mut self, samples: &[i16]) -> Option<String>;

    /// Drop any partial hypothesis, e.g. after a long silence.
    fn reset(&mut self);
}

/// Builds a decoder for the sample rate the audio stream actually
/// achieved (device fallbacks may move it away from the configured rate).
pub trait DecoderFactory: Send + Sync {
    fn create(&self, sample_rate: u32) -> Result<Box<dyn SpeechDecoder>, VoiceError>;
}
