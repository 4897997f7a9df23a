//! RMS threshold detector.

use super::{VadDecision, VoiceActivityDetector};
use crate::buffering::chunk::AudioChunk;

/// Frames whose RMS amplitude reaches `threshold` are speech.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// Typical range: 0.01–0.05 for a child-height tablet microphone.
    threshold: f32,
    last_rms: f32,
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            last_rms: 0.0,
        }
    }

    /// Root-mean-square of a sample slice; 0 for an empty slice.
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    /// RMS of the most recently classified chunk.
    pub fn last_rms(&self) -> f32 {
        self.last_rms
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision {
        self.last_rms = Self::rms(&chunk.samples);
        if self.last_rms >= self.threshold {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {
        self.last_rms = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn chunk(amplitude: f32, len: usize) -> AudioChunk {
        AudioChunk::new(vec![amplitude; len], 16000)
    }

    #[test]
    fn quiet_room_is_silence() {
        let mut vad = EnergyVad::new(0.02);
        assert_eq!(vad.classify(&chunk(0.005, 512)), VadDecision::Silence);
    }

    #[test]
    fn loud_frame_is_speech() {
        let mut vad = EnergyVad::new(0.02);
        assert_eq!(vad.classify(&chunk(0.3, 512)), VadDecision::Speech);
        assert_abs_diff_eq!(vad.last_rms(), 0.3, epsilon = 1e-6);
    }

    #[test]
    fn empty_chunk_is_silence() {
        let mut vad = EnergyVad::default();
        assert_eq!(vad.classify(&chunk(0.0, 0)), VadDecision::Silence);
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert_abs_diff_eq!(EnergyVad::rms(&samples), 0.5, epsilon = 1e-5);
    }
}
