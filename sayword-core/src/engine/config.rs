use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for `SpeechEngine`. Durations are stored in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Rate every offline recognizer consumes (Hz). Default: 16000.
    pub canonical_sample_rate: u32,
    /// Samples per emitted audio frame. Default: 512.
    pub frame_samples: usize,
    /// Hard ceiling for grammar and native sessions. Default: 10000.
    pub max_listen_ms: u64,
    /// How long a stop waits for trailing audio before finalizing. Default: 300.
    pub stop_grace_ms: u64,
    /// RMS above which a frame counts as speech. Default: 0.02.
    pub vad_threshold: f32,
    /// Silence after speech that ends a free-form utterance. Default: 500.
    pub trailing_silence_ms: u64,
    /// Longest free-form utterance. Default: 5000.
    pub max_speech_ms: u64,
    /// Budget for one free-form transcription. Default: 8000.
    pub transcribe_timeout_ms: u64,
    /// n-best alternatives requested from the native recognizer. Default: 10.
    pub native_max_alternatives: u32,
    /// Interval between simulated preload progress events. Default: 250.
    pub progress_tick_ms: u64,
    /// Longest audio blob kept per session. Default: 15000.
    pub max_blob_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            canonical_sample_rate: 16_000,
            frame_samples: 512,
            max_listen_ms: 10_000,
            stop_grace_ms: 300,
            vad_threshold: 0.02,
            trailing_silence_ms: 500,
            max_speech_ms: 5_000,
            transcribe_timeout_ms: 8_000,
            native_max_alternatives: 10,
            progress_tick_ms: 250,
            max_blob_ms: 15_000,
        }
    }
}

impl EngineConfig {
    pub fn max_listen(&self) -> Duration {
        Duration::from_millis(self.max_listen_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn trailing_silence(&self) -> Duration {
        Duration::from_millis(self.trailing_silence_ms)
    }

    pub fn max_speech(&self) -> Duration {
        Duration::from_millis(self.max_speech_ms)
    }

    pub fn transcribe_timeout(&self) -> Duration {
        Duration::from_millis(self.transcribe_timeout_ms)
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }

    pub fn max_blob(&self) -> Duration {
        Duration::from_millis(self.max_blob_ms)
    }

    /// Outer bound on a whole session, whatever the backend. Free-form
    /// sessions get the speech cap plus the transcription budget.
    pub fn session_ceiling(&self) -> Duration {
        let free_form = self.max_speech() + self.transcribe_timeout();
        self.max_listen().max(free_form) + self.stop_grace() * 2
    }

    /// Clamp values that would stall or spin a session.
    pub fn normalize(&mut self) {
        self.canonical_sample_rate = self.canonical_sample_rate.clamp(8_000, 48_000);
        self.frame_samples = self.frame_samples.clamp(64, 8_192);
        self.max_listen_ms = self.max_listen_ms.clamp(1_000, 60_000);
        self.stop_grace_ms = self.stop_grace_ms.min(2_000);
        if !self.vad_threshold.is_finite() || self.vad_threshold <= 0.0 {
            self.vad_threshold = Self::default().vad_threshold;
        }
        self.vad_threshold = self.vad_threshold.min(1.0);
        self.trailing_silence_ms = self.trailing_silence_ms.clamp(100, 5_000);
        self.max_speech_ms = self.max_speech_ms.clamp(500, 30_000);
        self.transcribe_timeout_ms = self.transcribe_timeout_ms.clamp(1_000, 60_000);
        self.native_max_alternatives = self.native_max_alternatives.clamp(1, 30);
        self.progress_tick_ms = self.progress_tick_ms.clamp(10, 5_000);
        self.max_blob_ms = self.max_blob_ms.min(120_000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"maxListenMs": 4000, "vadThreshold": 0.05}"#).unwrap();
        assert_eq!(config.max_listen(), Duration::from_secs(4));
        assert!((config.vad_threshold - 0.05).abs() < f32::EPSILON);
        assert_eq!(config.stop_grace_ms, 300);
        assert_eq!(config.canonical_sample_rate, 16_000);
    }

    #[test]
    fn normalize_repairs_nonsense() {
        let mut config = EngineConfig {
            frame_samples: 0,
            vad_threshold: f32::NAN,
            max_listen_ms: 0,
            ..EngineConfig::default()
        };
        config.normalize();
        assert_eq!(config.frame_samples, 64);
        assert_eq!(config.max_listen_ms, 1_000);
        assert!((config.vad_threshold - 0.02).abs() < f32::EPSILON);
    }

    #[test]
    fn ceiling_covers_free_form_path() {
        let config = EngineConfig::default();
        assert!(config.session_ceiling() >= config.max_speech() + config.transcribe_timeout());
        assert!(config.session_ceiling() >= config.max_listen());
    }
}
