//! Event types that leave the engine.
//!
//! | Event                | Produced by                          |
//! |----------------------|--------------------------------------|
//! | `RecognitionEvent`   | `RecognitionStream` (one per session) |
//! | `EngineStatusEvent`  | `SpeechEngine::subscribe_status`     |
//! | `ModelStatusEvent`   | `ModelManager::subscribe`            |
//! | `PreloadUpdate`      | `ModelManager::preload`              |
//!
//! Everything is camelCase JSON so a UI layer can consume it unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffering::chunk::SessionId;
use crate::matcher::MatchResult;

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Platform speech recognizer supplied by the host.
    Native,
    /// Offline recognizer restricted to a vocabulary.
    #[serde(rename = "constrained-grammar")]
    Grammar,
    /// Offline general transcription model.
    #[serde(rename = "free-form")]
    FreeForm,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::Grammar => "constrained-grammar",
            BackendKind::FreeForm => "free-form",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Recognition events
// ---------------------------------------------------------------------------

/// One entry of an n-best list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alternative {
    pub text: String,
    pub confidence: Option<f32>,
}

impl Alternative {
    pub fn new(text: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenStatus {
    Listening,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    /// Best transcript.
    pub transcript: String,
    /// Every alternative the backend reported, best first.
    pub alternatives: Vec<Alternative>,
    pub confidence: Option<f32>,
    pub backend: BackendKind,
    /// Present when the caller supplied a target word.
    pub matched: Option<MatchResult>,
    /// 16-bit mono WAV of the session, when requested. Carried in memory only.
    #[serde(skip)]
    pub audio_blob: Option<Vec<u8>>,
}

impl RecognitionResult {
    /// Every alternative text, transcript first, without duplicates.
    pub fn candidates(&self) -> Vec<&str> {
        let mut out: Vec<&str> = vec![self.transcript.as_str()];
        for alt in &self.alternatives {
            if !out.contains(&alt.text.as_str()) {
                out.push(alt.text.as_str());
            }
        }
        out
    }

    pub fn is_match(&self) -> bool {
        self.matched.as_ref().is_some_and(|m| m.matched)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecognitionErrorKind {
    /// Nothing recognizable was heard.
    NoSpeech,
    /// The session hit its hard ceiling.
    Timeout,
    /// Microphone access was refused.
    PermissionDenied,
    /// No backend model could be made ready.
    ModelLoad,
    /// Capture failed for a reason other than permission.
    Audio,
    /// A worker or recognizer failed mid-session.
    Worker,
    /// No backend is available at all.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionError {
    pub kind: RecognitionErrorKind,
    pub message: String,
}

impl RecognitionError {
    pub fn new(kind: RecognitionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn no_speech() -> Self {
        Self::new(RecognitionErrorKind::NoSpeech, "no speech detected")
    }

    pub fn timeout() -> Self {
        Self::new(RecognitionErrorKind::Timeout, "listening timed out")
    }

    /// Soft failures the UI should simply invite a retry for.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            RecognitionErrorKind::NoSpeech
                | RecognitionErrorKind::Timeout
                | RecognitionErrorKind::ModelLoad
        )
    }
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<crate::error::SaywordError> for RecognitionError {
    fn from(err: crate::error::SaywordError) -> Self {
        use crate::error::SaywordError as E;
        let kind = match &err {
            E::PermissionDenied(_) => RecognitionErrorKind::PermissionDenied,
            E::ModelLoad(_) | E::ModelNotFound { .. } | E::ModelNotReady(_) => {
                RecognitionErrorKind::ModelLoad
            }
            E::AudioDevice(_) | E::AudioStream(_) | E::NoDefaultInputDevice | E::Resample(_) => {
                RecognitionErrorKind::Audio
            }
            _ => RecognitionErrorKind::Worker,
        };
        Self::new(kind, err.to_string())
    }
}

/// What a `RecognitionStream` yields: zero or more status/partial events,
/// then exactly one `Result` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecognitionEvent {
    Status { status: ListenStatus },
    Partial { text: String },
    Result(RecognitionResult),
    Error(RecognitionError),
}

impl RecognitionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecognitionEvent::Result(_) | RecognitionEvent::Error(_))
    }
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    pub session_id: Option<SessionId>,
    pub backend: Option<BackendKind>,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineStatus {
    Idle,
    SelectingBackend,
    Listening,
    Processing,
    Speaking,
}

// ---------------------------------------------------------------------------
// Model lifecycle events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
    /// Downloaded in an earlier run; not yet loaded in this one.
    Cached,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatusEvent {
    pub backend: BackendKind,
    pub language: Option<String>,
    pub status: ModelStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadStatus {
    Loading,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreloadUpdate {
    pub status: PreloadStatus,
    /// 0.0–1.0 while loading.
    pub progress: Option<f32>,
    pub detail: Option<String>,
}

impl PreloadUpdate {
    pub fn loading(progress: f32) -> Self {
        Self {
            status: PreloadStatus::Loading,
            progress: Some(progress),
            detail: None,
        }
    }

    pub fn done() -> Self {
        Self {
            status: PreloadStatus::Done,
            progress: Some(1.0),
            detail: None,
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: PreloadStatus::Error,
            progress: None,
            detail: Some(detail.into()),
        }
    }
}
