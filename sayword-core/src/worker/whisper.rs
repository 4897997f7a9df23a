//! whisper.cpp engine for the free-form transcription worker.

use std::path::PathBuf;

use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{ProgressFn, Transcriber, TranscriberLoader, Transcript};
use crate::{
    error::{Result, SaywordError},
    ipc::events::Alternative,
    models::assets::{self, ModelSource},
};

/// Segments with `no_speech` probability above this are discarded.
const NO_SPEECH_THRESHOLD: f32 = 0.6;

/// Cache entry name when no explicit path is configured.
const CACHE_NAME: &str = "whisper-model.bin";

/// Text whisper tends to produce from non-speech audio.
fn is_hallucinated_noise(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.starts_with('[') && lower.ends_with(']')
        || lower.starts_with('(') && lower.ends_with(')')
        || lower.starts_with('*') && lower.ends_with('*')
        || lower.contains("thanks for watching")
        || lower.contains("subscribe")
}

pub struct WhisperLoader {
    cache_dir: PathBuf,
}

impl WhisperLoader {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }
}

impl TranscriberLoader for WhisperLoader {
    fn load(&self, source: &ModelSource, progress: ProgressFn<'_>) -> Result<Box<dyn Transcriber>> {
        let path = assets::resolve(source, &self.cache_dir, CACHE_NAME, progress)?;
        let path_str = path
            .to_str()
            .ok_or_else(|| SaywordError::ModelLoad("model path contains invalid UTF-8".into()))?;

        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| SaywordError::ModelLoad(format!("failed to load whisper model: {e}")))?;
        info!(path = %path.display(), "whisper model loaded");
        Ok(Box::new(WhisperTranscriber { ctx }))
    }
}

struct WhisperTranscriber {
    ctx: WhisperContext,
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<Transcript> {
        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| SaywordError::Recognizer(format!("failed to create whisper state: {e}")))?;

        let language = language
            .split(['-', '_'])
            .next()
            .unwrap_or(language)
            .to_lowercase();
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&language));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);

        state
            .full(params, samples)
            .map_err(|e| SaywordError::Recognizer(format!("whisper transcription failed: {e}")))?;

        let mut pieces = Vec::new();
        for i in 0..state.full_n_segments() {
            let segment = state
                .get_segment(i)
                .ok_or_else(|| SaywordError::Recognizer(format!("segment {i} out of bounds")))?;

            let no_speech = segment.no_speech_probability();
            if no_speech > NO_SPEECH_THRESHOLD {
                debug!("skipping segment {i}: no_speech_prob={no_speech:.2}");
                continue;
            }

            let text = segment
                .to_str()
                .map_err(|e| SaywordError::Recognizer(format!("failed to get segment text: {e}")))?
                .trim()
                .to_string();
            if text.is_empty() || is_hallucinated_noise(&text) {
                continue;
            }
            pieces.push((text, 1.0 - no_speech));
        }

        if pieces.is_empty() {
            return Ok(Transcript::empty());
        }
        let text = pieces
            .iter()
            .map(|(t, _)| t.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let confidence = pieces.iter().map(|(_, c)| *c).fold(f32::INFINITY, f32::min);
        Ok(Transcript {
            alternatives: vec![Alternative::new(text.clone(), Some(confidence))],
            text,
            confidence: Some(confidence),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracketed_noise_is_filtered() {
        assert!(is_hallucinated_noise("[BLANK_AUDIO]"));
        assert!(is_hallucinated_noise("(music)"));
        assert!(!is_hallucinated_noise("elephant"));
    }
}
