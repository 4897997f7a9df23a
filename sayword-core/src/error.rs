use thiserror::Error;

/// All errors produced by sayword-core.
#[derive(Debug, Error)]
pub enum SaywordError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("resample error: {0}")]
    Resample(String),

    #[error("model asset not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("model is not ready: {0}")]
    ModelNotReady(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("worker thread is gone")]
    WorkerGone,

    #[error("recognizer error: {0}")]
    Recognizer(String),

    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    #[error("cache store error: {0}")]
    CacheStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SaywordError>;
