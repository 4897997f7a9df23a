//! Decides when a free-form utterance is over.
//!
//! Speech "starts" on the first chunk the detector classifies as speech.
//! After that, trailing silence is accumulated and reset by every speech
//! chunk. The utterance is finalized once trailing silence reaches the
//! silence limit, or once the total captured duration reaches the hard cap.
//! All durations are counted in samples, so results do not depend on how
//! fast frames arrive.

use std::time::Duration;

use super::VoiceActivityDetector;
use crate::buffering::chunk::AudioChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// Speech was followed by enough silence.
    TrailingSilence,
    /// Speech ran into the duration cap.
    MaxDuration,
    /// The cap was reached without any speech.
    NoSpeech,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDecision {
    /// No speech yet.
    Waiting,
    /// Inside an utterance.
    Speaking,
    Finalize(FinalizeReason),
}

pub struct SpeechEndpointer<V: VoiceActivityDetector> {
    vad: V,
    silence_limit: usize,
    max_samples: usize,
    speech_started: bool,
    trailing_silence: usize,
    total: usize,
}

impl<V: VoiceActivityDetector> SpeechEndpointer<V> {
    pub fn new(vad: V, sample_rate: u32, trailing_silence: Duration, max_duration: Duration) -> Self {
        Self {
            vad,
            silence_limit: samples_for(sample_rate, trailing_silence),
            max_samples: samples_for(sample_rate, max_duration),
            speech_started: false,
            trailing_silence: 0,
            total: 0,
        }
    }

    pub fn feed(&mut self, chunk: &AudioChunk) -> EndpointDecision {
        let decision = self.vad.classify(chunk);
        let len = chunk.samples.len();
        self.total += len;

        if decision.is_speech() {
            self.speech_started = true;
            self.trailing_silence = 0;
        } else if self.speech_started {
            self.trailing_silence += len;
        }

        if self.speech_started && self.trailing_silence >= self.silence_limit {
            return EndpointDecision::Finalize(FinalizeReason::TrailingSilence);
        }
        if self.total >= self.max_samples {
            return EndpointDecision::Finalize(if self.speech_started {
                FinalizeReason::MaxDuration
            } else {
                FinalizeReason::NoSpeech
            });
        }

        if self.speech_started {
            EndpointDecision::Speaking
        } else {
            EndpointDecision::Waiting
        }
    }

    pub fn speech_started(&self) -> bool {
        self.speech_started
    }

    pub fn reset(&mut self) {
        self.vad.reset();
        self.speech_started = false;
        self.trailing_silence = 0;
        self.total = 0;
    }
}

fn samples_for(sample_rate: u32, duration: Duration) -> usize {
    (sample_rate as u128 * duration.as_millis() / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::EnergyVad;

    const RATE: u32 = 16_000;
    // 100 ms
    const FRAME: usize = 1_600;

    fn endpointer() -> SpeechEndpointer<EnergyVad> {
        SpeechEndpointer::new(
            EnergyVad::new(0.02),
            RATE,
            Duration::from_millis(500),
            Duration::from_millis(5_000),
        )
    }

    fn loud() -> AudioChunk {
        AudioChunk::new(vec![0.2; FRAME], RATE)
    }

    fn quiet() -> AudioChunk {
        AudioChunk::new(vec![0.0; FRAME], RATE)
    }

    #[test]
    fn silence_before_speech_keeps_waiting() {
        let mut ep = endpointer();
        for _ in 0..10 {
            assert_eq!(ep.feed(&quiet()), EndpointDecision::Waiting);
        }
        assert!(!ep.speech_started());
    }

    #[test]
    fn finalizes_after_half_a_second_of_trailing_silence() {
        let mut ep = endpointer();
        assert_eq!(ep.feed(&loud()), EndpointDecision::Speaking);
        for _ in 0..4 {
            assert_eq!(ep.feed(&quiet()), EndpointDecision::Speaking);
        }
        assert_eq!(
            ep.feed(&quiet()),
            EndpointDecision::Finalize(FinalizeReason::TrailingSilence)
        );
    }

    #[test]
    fn speech_resets_trailing_silence() {
        let mut ep = endpointer();
        ep.feed(&loud());
        for _ in 0..4 {
            ep.feed(&quiet());
        }
        assert_eq!(ep.feed(&loud()), EndpointDecision::Speaking);
        for _ in 0..4 {
            assert_eq!(ep.feed(&quiet()), EndpointDecision::Speaking);
        }
    }

    #[test]
    fn continuous_speech_hits_the_cap() {
        let mut ep = endpointer();
        for _ in 0..49 {
            assert_eq!(ep.feed(&loud()), EndpointDecision::Speaking);
        }
        assert_eq!(
            ep.feed(&loud()),
            EndpointDecision::Finalize(FinalizeReason::MaxDuration)
        );
    }

    #[test]
    fn cap_without_speech_reports_no_speech() {
        let mut ep = endpointer();
        for _ in 0..49 {
            ep.feed(&quiet());
        }
        assert_eq!(
            ep.feed(&quiet()),
            EndpointDecision::Finalize(FinalizeReason::NoSpeech)
        );
    }

    #[test]
    fn reset_starts_over() {
        let mut ep = endpointer();
        ep.feed(&loud());
        ep.reset();
        assert!(!ep.speech_started());
        assert_eq!(ep.feed(&quiet()), EndpointDecision::Waiting);
    }
}
