//! Best-effort WAV capture of a session's audio.
//!
//! Runs alongside recognition. Failures are logged and turn into "no blob";
//! they never reach the recognition result path.

use std::io::Cursor;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{debug, warn};

use crate::buffering::chunk::to_pcm16;

pub struct BlobRecorder {
    sample_rate: u32,
    max_samples: usize,
    samples: Vec<f32>,
    truncated: bool,
}

impl BlobRecorder {
    pub fn new(sample_rate: u32, max_duration: Duration) -> Self {
        let max_samples = (sample_rate as u128 * max_duration.as_millis() / 1000) as usize;
        Self {
            sample_rate,
            max_samples,
            samples: Vec::new(),
            truncated: false,
        }
    }

    pub fn push(&mut self, samples: &[f32]) {
        let room = self.max_samples.saturating_sub(self.samples.len());
        if samples.len() > room {
            if !self.truncated {
                debug!(max_samples = self.max_samples, "recorder cap reached");
            }
            self.truncated = true;
        }
        self.samples.extend_from_slice(&samples[..samples.len().min(room)]);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 16-bit mono WAV bytes, or `None` if nothing was captured or encoding failed.
    pub fn finish(self) -> Option<Vec<u8>> {
        if self.samples.is_empty() {
            return None;
        }
        match encode_wav(&self.samples, self.sample_rate) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("audio blob encoding failed: {e}");
                None
            }
        }
    }
}

fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for sample in to_pcm16(samples) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
