//! Messages crossing the worker boundary.
//!
//! Both directions are `{ "type": ..., ...payload }` objects. Every message
//! that belongs to a recognition session carries its `sessionId`.

use serde::{Deserialize, Serialize};

use crate::buffering::chunk::SessionId;
use crate::ipc::events::Alternative;
use crate::models::assets::ModelSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerCommand {
    /// Load (or replace) the model for `language`.
    #[serde(rename_all = "camelCase")]
    Load { language: String, source: ModelSource },
    /// Create a recognizer for a session, optionally restricted to `vocabulary`.
    #[serde(rename_all = "camelCase")]
    Start {
        session_id: SessionId,
        vocabulary: Option<Vec<String>>,
        sample_rate: u32,
    },
    /// Stream one frame into the session's recognizer.
    #[serde(rename_all = "camelCase")]
    Audio {
        session_id: SessionId,
        samples: Vec<f32>,
    },
    /// Finalize the session and release its recognizer.
    #[serde(rename_all = "camelCase")]
    Stop { session_id: SessionId },
    /// One-shot transcription of a complete utterance.
    #[serde(rename_all = "camelCase")]
    Transcribe {
        session_id: SessionId,
        samples: Vec<f32>,
        sample_rate: u32,
        language: String,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub text: String,
    /// Best first. May repeat `text` as its first entry.
    pub alternatives: Vec<Alternative>,
    pub confidence: Option<f32>,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            alternatives: Vec::new(),
            confidence: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.alternatives.iter().all(|a| a.text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerEvent {
    #[serde(rename_all = "camelCase")]
    Progress { language: String, progress: f32 },
    #[serde(rename_all = "camelCase")]
    Ready { language: String },
    #[serde(rename_all = "camelCase")]
    Started { session_id: SessionId },
    #[serde(rename_all = "camelCase")]
    Partial { session_id: SessionId, text: String },
    #[serde(rename_all = "camelCase")]
    Result {
        session_id: SessionId,
        transcript: Transcript,
    },
    #[serde(rename_all = "camelCase")]
    Stopped { session_id: SessionId },
    /// Session errors carry `session_id`; load errors carry `language`.
    #[serde(rename_all = "camelCase")]
    Error {
        session_id: Option<SessionId>,
        language: Option<String>,
        message: String,
    },
}

impl WorkerEvent {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            WorkerEvent::Started { session_id }
            | WorkerEvent::Partial { session_id, .. }
            | WorkerEvent::Result { session_id, .. }
            | WorkerEvent::Stopped { session_id } => Some(*session_id),
            WorkerEvent::Error { session_id, .. } => *session_id,
            WorkerEvent::Progress { .. } | WorkerEvent::Ready { .. } => None,
        }
    }

    pub fn session_error(session_id: SessionId, message: impl Into<String>) -> Self {
        WorkerEvent::Error {
            session_id: Some(session_id),
            language: None,
            message: message.into(),
        }
    }

    pub fn load_error(language: impl Into<String>, message: impl Into<String>) -> Self {
        WorkerEvent::Error {
            session_id: None,
            language: Some(language.into()),
            message: message.into(),
        }
    }
}
