//! Pre-recorded audio fed through the same pipeline as a microphone.

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use super::{ActiveCapture, AudioSource};
use crate::{
    buffering::{AudioProducer, Producer},
    error::{Result, SaywordError},
};

/// Samples pushed per pump iteration.
const BLOCK: usize = 512;

#[derive(Debug, Clone)]
pub struct InjectedSource {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    paced: bool,
    trailing_silence: bool,
}

impl InjectedSource {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
            paced: false,
            trailing_silence: false,
        }
    }

    /// A source that opens fine but never produces a sample.
    pub fn silent(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    /// Deliver samples at wall-clock speed instead of as fast as possible.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Keep producing digital silence after the recording ends, like a
    /// microphone in a quiet room.
    pub fn with_trailing_silence(mut self, enabled: bool) -> Self {
        self.trailing_silence = enabled;
        self
    }

    /// Load a WAV file, downmixing to mono.
    pub fn from_wav(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path).map_err(|e| {
            SaywordError::AudioDevice(format!("failed to open wav {}: {e}", path.display()))
        })?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| SaywordError::AudioDevice(format!("wav decode: {e}")))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| SaywordError::AudioDevice(format!("wav decode: {e}")))?
            }
        };

        let mono = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        Ok(Self::new(mono, spec.sample_rate))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioSource for InjectedSource {
    fn describe(&self) -> String {
        format!("injected ({} samples @ {} Hz)", self.samples.len(), self.sample_rate)
    }

    fn open(
        &self,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        _frame_hint: usize,
    ) -> Result<Box<dyn ActiveCapture>> {
        Ok(Box::new(InjectedCapture {
            source: self.clone(),
            producer,
            running,
            position: 0,
            block_period: Duration::from_micros(BLOCK as u64 * 1_000_000 / self.sample_rate.max(1) as u64),
            last_push: None,
        }))
    }
}

struct InjectedCapture {
    source: InjectedSource,
    producer: AudioProducer,
    running: Arc<AtomicBool>,
    position: usize,
    block_period: Duration,
    last_push: Option<Instant>,
}

impl ActiveCapture for InjectedCapture {
    fn sample_rate(&self) -> u32 {
        self.source.sample_rate
    }

    fn pump(&mut self) -> bool {
        if !self.running.load(Ordering::Relaxed) {
            return false;
        }
        if self.source.paced {
            if let Some(last) = self.last_push {
                if last.elapsed() < self.block_period {
                    return true;
                }
            }
        }

        let samples = &self.source.samples;
        if self.position < samples.len() {
            let end = (self.position + BLOCK).min(samples.len());
            let written = self.producer.push_slice(&samples[self.position..end]);
            self.position += written;
        } else if self.source.trailing_silence {
            self.producer.push_slice(&[0.0; BLOCK]);
        } else {
            return false;
        }

        self.last_push = Some(Instant::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_round_trip_downmixes_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(16_384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let source = InjectedSource::from_wav(&path).unwrap();
        assert_eq!(source.sample_rate(), 22_050);
        assert_eq!(source.samples.len(), 100);
        assert!((source.samples[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn missing_wav_is_an_error() {
        assert!(InjectedSource::from_wav(Path::new("/nonexistent/x.wav")).is_err());
    }
}
