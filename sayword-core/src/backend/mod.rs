//! Recognition backends.
//!
//! Each adapter turns one `ListenRequest` into exactly one outcome, emitting
//! status and partial events through the `SessionContext` along the way.
//! Adapters never load models themselves; they borrow a ready worker from
//! the `ModelManager` and release everything they opened on every exit path
//! (guards and drops, not explicit cleanup calls).

pub mod freeform;
pub mod grammar;
pub mod native;

pub use freeform::FreeFormAdapter;
pub use grammar::GrammarAdapter;
pub use native::{
    NativeAdapter, NativeErrorCode, NativeEvent, NativeOptions, NativeRecognizer, NativeStartError,
};

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{
    audio::{BlobRecorder, CaptureSession},
    buffering::chunk::AudioFrame,
    engine::SessionContext,
    ipc::events::{Alternative, BackendKind, RecognitionError, RecognitionResult},
    worker::Transcript,
};

/// What the caller wants recognized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListenRequest {
    /// Word the result is matched against. Absent: plain transcription.
    pub target: Option<String>,
    pub language: String,
    /// Closed answer set for the grammar backend.
    pub vocabulary: Option<Vec<String>>,
    /// Attach a WAV recording of the session to the result.
    pub capture_audio: bool,
}

impl ListenRequest {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            ..Self::default()
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn vocabulary<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vocabulary = Some(words.into_iter().map(Into::into).collect());
        self
    }

    pub fn capture_audio(mut self, enabled: bool) -> Self {
        self.capture_audio = enabled;
        self
    }

    /// Non-empty, trimmed vocabulary, if any.
    pub fn grammar_words(&self) -> Option<Vec<String>> {
        let words: Vec<String> = self
            .vocabulary
            .as_ref()?
            .iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();
        (!words.is_empty()).then_some(words)
    }
}

pub type Outcome = std::result::Result<RecognitionResult, RecognitionError>;

pub trait RecognitionBackend: Send + Sync {
    fn listen(
        &self,
        request: &ListenRequest,
        ctx: &SessionContext,
    ) -> impl Future<Output = Outcome> + Send;
}

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Next frame of an optional capture; pending forever when there is none.
pub(crate) async fn next_frame(capture: &mut Option<CaptureSession>) -> Option<AudioFrame> {
    match capture {
        Some(capture) => capture.next_frame().await,
        None => std::future::pending().await,
    }
}

pub(crate) fn result_from_transcript(
    backend: BackendKind,
    transcript: Transcript,
    audio_blob: Option<Vec<u8>>,
) -> RecognitionResult {
    let mut alternatives = transcript.alternatives;
    if alternatives.is_empty() && !transcript.text.trim().is_empty() {
        alternatives.push(Alternative::new(transcript.text.clone(), transcript.confidence));
    }
    RecognitionResult {
        transcript: transcript.text.trim().to_string(),
        alternatives,
        confidence: transcript.confidence,
        backend,
        matched: None,
        audio_blob,
    }
}

/// A recorder when the caller asked for one.
pub(crate) fn recorder_for(
    request: &ListenRequest,
    ctx: &SessionContext,
    sample_rate: u32,
) -> Option<BlobRecorder> {
    request
        .capture_audio
        .then(|| BlobRecorder::new(sample_rate, ctx.config().max_blob()))
}
