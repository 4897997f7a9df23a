//! Voice activity detection.
//!
//! `VoiceActivityDetector` classifies single chunks; [`SpeechEndpointer`]
//! turns a stream of decisions into "keep listening" or "finalize now".

pub mod endpoint;
pub mod energy;

pub use endpoint::{EndpointDecision, FinalizeReason, SpeechEndpointer};
pub use energy::EnergyVad;

use crate::buffering::chunk::AudioChunk;

/// Whether a given audio chunk contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Trait for all VAD implementations.
pub trait VoiceActivityDetector: Send + 'static {
    /// Analyse a chunk and return a speech/silence decision.
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision;

    /// Reset any internal state.
    fn reset(&mut self);
}
