//! Vosk engine for the constrained-grammar worker.

use std::path::PathBuf;

use tracing::{debug, info};
use vosk::{CompleteResult, DecodingState, Model, Recognizer};

use super::{Decode, GrammarModel, GrammarModelLoader, GrammarRecognizer, ProgressFn, Transcript};
use crate::{
    error::{Result, SaywordError},
    ipc::events::Alternative,
    models::assets::{self, ModelSource},
};

/// n-best entries requested from every recognizer.
const MAX_ALTERNATIVES: u16 = 5;

/// Catch-all word that lets the grammar reject out-of-set speech.
const UNKNOWN_WORD: &str = "[unk]";

pub struct VoskLoader {
    cache_dir: PathBuf,
}

impl VoskLoader {
    pub fn new(cache_dir: PathBuf) -> Self {
        vosk::set_log_level(vosk::LogLevel::Error);
        Self { cache_dir }
    }
}

impl GrammarModelLoader for VoskLoader {
    fn load(
        &self,
        language: &str,
        source: &ModelSource,
        progress: ProgressFn<'_>,
    ) -> Result<Box<dyn GrammarModel>> {
        let path = assets::resolve(source, &self.cache_dir, &format!("vosk-{language}"), progress)?;
        let path_str = path
            .to_str()
            .ok_or_else(|| SaywordError::ModelLoad("model path contains invalid UTF-8".into()))?;

        let model = Model::new(path_str).ok_or_else(|| {
            SaywordError::ModelLoad(format!("vosk could not load {}", path.display()))
        })?;
        info!(language, path = %path.display(), "vosk model loaded");
        Ok(Box::new(VoskModel { model }))
    }
}

struct VoskModel {
    model: Model,
}

impl GrammarModel for VoskModel {
    fn recognizer(
        &self,
        vocabulary: Option<&[String]>,
        sample_rate: u32,
    ) -> Result<Box<dyn GrammarRecognizer>> {
        let rate = sample_rate as f32;
        let recognizer = match vocabulary {
            Some(words) => {
                let mut grammar: Vec<String> =
                    words.iter().map(|w| w.trim().to_lowercase()).collect();
                grammar.push(UNKNOWN_WORD.to_string());
                debug!(phrases = grammar.len(), "grammar recognizer");
                Recognizer::new_with_grammar(&self.model, rate, &grammar)
            }
            None => Recognizer::new(&self.model, rate),
        };
        let mut recognizer = recognizer
            .ok_or_else(|| SaywordError::Recognizer("failed to create vosk recognizer".into()))?;
        recognizer.set_max_alternatives(MAX_ALTERNATIVES);
        recognizer.set_partial_words(false);
        Ok(Box::new(VoskRecognizer { recognizer }))
    }
}

struct VoskRecognizer {
    recognizer: Recognizer,
}

impl GrammarRecognizer for VoskRecognizer {
    fn accept(&mut self, pcm: &[i16]) -> Result<Decode> {
        let state = self
            .recognizer
            .accept_waveform(pcm)
            .map_err(|e| SaywordError::Recognizer(e.to_string()))?;

        Ok(match state {
            DecodingState::Finalized => Decode::Final(to_transcript(self.recognizer.result())),
            DecodingState::Running => {
                let partial = self.recognizer.partial_result().partial.trim().to_string();
                if partial.is_empty() || partial == UNKNOWN_WORD {
                    Decode::Running
                } else {
                    Decode::Partial(partial)
                }
            }
            DecodingState::Failed => {
                return Err(SaywordError::Recognizer("vosk decoding failed".into()))
            }
        })
    }

    fn finish(&mut self) -> Transcript {
        to_transcript(self.recognizer.final_result())
    }
}

fn to_transcript(result: CompleteResult<'_>) -> Transcript {
    let alternatives: Vec<Alternative> = match result {
        CompleteResult::Multiple(multiple) => multiple
            .alternatives
            .iter()
            .map(|alt| Alternative::new(clean(alt.text), Some(alt.confidence)))
            .filter(|alt| !alt.text.is_empty())
            .collect(),
        CompleteResult::Single(single) => {
            let text = clean(single.text);
            if text.is_empty() {
                Vec::new()
            } else {
                vec![Alternative::new(text, None)]
            }
        }
    };

    match alternatives.first() {
        Some(best) => Transcript {
            text: best.text.clone(),
            confidence: best.confidence,
            alternatives,
        },
        None => Transcript::empty(),
    }
}

fn clean(text: &str) -> String {
    text.split_whitespace()
        .filter(|w| *w != UNKNOWN_WORD)
        .collect::<Vec<_>>()
        .join(" ")
}
