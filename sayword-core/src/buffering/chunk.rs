//! Typed audio blocks passed from the capture pump to the backends.

/// Monotonic identifier of one recognition attempt.
pub type SessionId = u64;

/// A contiguous block of mono PCM samples at a known sample rate.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A fixed-size chunk tagged with the session that was current when the
/// capture pump emitted it.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub session_id: SessionId,
    pub chunk: AudioChunk,
}

impl AudioFrame {
    pub fn new(session_id: SessionId, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            session_id,
            chunk: AudioChunk::new(samples, sample_rate),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.chunk.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.chunk.sample_rate
    }
}

/// Convert normalized f32 samples to 16-bit PCM, clamping out-of-range values.
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_of_one_second() {
        let chunk = AudioChunk::new(vec![0.0; 16_000], 16_000);
        assert_eq!(chunk.duration_ms(), 1000);
    }

    #[test]
    fn pcm16_clamps() {
        let pcm = to_pcm16(&[0.0, 1.0, -1.0, 2.5, -3.0]);
        assert_eq!(pcm, vec![0, i16::MAX, -i16::MAX, i16::MAX, -i16::MAX]);
    }
}
