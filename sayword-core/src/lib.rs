//! # sayword-core
//!
//! Speech recognition orchestration for spoken-answer quizzes: capture a
//! child's answer, route it through one of several recognizers and decide
//! whether it matches the target word.
//!
//! ## Architecture
//!
//! ```text
//!                       SpeechEngine::listen(ListenRequest)
//!                                    │
//!                   backend selection (ModelManager readiness)
//!            ┌───────────────────────┼────────────────────────┐
//!      NativeAdapter          GrammarAdapter            FreeFormAdapter
//!   (host recognizer)   frames ─► grammar worker    VAD ─► transcribe worker
//!                              ▲                          ▲
//!                              └── AudioSource → ring → pump → resample → frames
//!                                    │
//!                       matcher::evaluate(alternatives, target)
//!                                    │
//!                    RecognitionStream: status*, partial*, one terminal
//! ```
//!
//! Offline models live on dedicated worker threads owned by the
//! [`ModelManager`]; the device callback only pushes into a lock-free ring.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod backend;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod matcher;
pub mod models;
pub mod vad;
pub mod worker;

// Convenience re-exports for downstream crates
pub use audio::{AudioSource, InjectedSource, MicrophoneSource};
pub use backend::{
    ListenRequest, NativeErrorCode, NativeEvent, NativeOptions, NativeRecognizer, NativeStartError,
};
pub use engine::{
    Cue, CuePlayer, EngineConfig, RecognitionStream, SpeechEngine, SpeechEngineBuilder,
    SpeechSynthesizer,
};
pub use error::{Result, SaywordError};
pub use ipc::events::{
    Alternative, BackendKind, EngineStatus, EngineStatusEvent, ListenStatus, ModelStatus,
    ModelStatusEvent, PreloadStatus, PreloadUpdate, RecognitionError, RecognitionErrorKind,
    RecognitionEvent, RecognitionResult,
};
pub use matcher::{evaluate, matches, MatchResult, MatchStrategy};
pub use models::{
    CacheStore, EngineLoaders, ModelAssets, ModelKind, ModelManager, ModelSource,
};
