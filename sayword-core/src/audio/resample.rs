//! Sample-rate conversion with rubato's `FastFixedIn`.
//!
//! Microphones capture at 44.1 or 48 kHz, recognizers want 16 kHz.
//! [`RateConverter`] runs on the capture pump for streaming backends;
//! [`resample_offline`] converts a whole buffered utterance at once for the
//! free-form backend. Equal rates are a passthrough and create no rubato
//! session at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{Result, SaywordError};

/// Input frames per rubato call.
pub const RESAMPLE_CHUNK: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// `[1][output_frames_max]`
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(SaywordError::Resample(format!(
                "invalid rates {from_rate} -> {to_rate}"
            )));
        }
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            chunk_size,
            1,
        )
        .map_err(|e| SaywordError::Resample(format!("resampler init: {e}")))?;

        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];
        debug!(from_rate, to_rate, chunk_size, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Feed samples; returns whatever full chunks produced (may be empty).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input], &mut self.output_buf, None) {
                Ok((_, produced)) => result.extend_from_slice(&self.output_buf[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Push out the buffered remainder, zero-padded to a full chunk.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let Some(ref mut resampler) = self.resampler else {
            return Ok(Vec::new());
        };
        if self.input_buf.is_empty() {
            return Ok(Vec::new());
        }

        let remainder = std::mem::take(&mut self.input_buf);
        let input: [&[f32]; 1] = [remainder.as_slice()];
        let (_, produced) = resampler
            .process_partial_into_buffer(Some(&input[..]), &mut self.output_buf, None)
            .map_err(|e| SaywordError::Resample(e.to_string()))?;
        Ok(self.output_buf[0][..produced].to_vec())
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Resample a complete buffer. Output length is `len * to / from`, rounded.
pub fn resample_offline(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let expected = (samples.len() as u64 * to_rate as u64 + from_rate as u64 / 2) / from_rate as u64;
    let mut converter = RateConverter::new(from_rate, to_rate, RESAMPLE_CHUNK)?;
    let mut out = converter.process(samples);
    out.extend(converter.flush()?);
    out.truncate(expected as usize);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
        assert!(rc.flush().unwrap().is_empty());
    }

    #[test]
    fn streaming_48k_to_16k_chunk_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out = rc.process(&vec![0.0f32; 960]);
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={}",
            out.len()
        );
    }

    #[test]
    fn remainder_waits_until_flush() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        let flushed = rc.flush().unwrap();
        assert!(!flushed.is_empty());
        assert!(rc.flush().unwrap().is_empty(), "second flush has nothing left");
    }

    #[test]
    fn zero_rate_rejected() {
        assert!(RateConverter::new(0, 16_000, 960).is_err());
    }

    #[test]
    fn offline_one_second_at_48k() {
        let input: Vec<f32> = (0..48_000)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 48_000.0).sin() * 0.5)
            .collect();
        let out = resample_offline(&input, 48_000, 16_000).unwrap();
        assert!(
            (out.len() as isize - 16_000).unsigned_abs() <= 400,
            "output len={}",
            out.len()
        );
        assert!(out.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn offline_same_rate_is_copy() {
        let input = vec![0.25f32; 100];
        assert_eq!(resample_offline(&input, 16_000, 16_000).unwrap(), input);
    }
}
