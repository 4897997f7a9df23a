//! Host-supplied audio output: short listening cues and text-to-speech.

use std::future::Future;
use std::pin::Pin;

use crate::error::{Result, SaywordError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    ListeningStarted,
    ListeningStopped,
}

pub trait CuePlayer: Send + Sync + 'static {
    /// Resolves once the cue has finished playing.
    fn play(&self, cue: Cue) -> BoxFuture<'_, Result<()>>;
}

/// Plays nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentCues;

impl CuePlayer for SilentCues {
    fn play(&self, _cue: Cue) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Resolves when playback ends. Dropping the future must stop playback.
    fn speak<'a>(&'a self, text: &'a str, language: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// For hosts without text-to-speech.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSynthesizer;

impl SpeechSynthesizer for NoSynthesizer {
    fn speak<'a>(&'a self, _text: &'a str, _language: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Err(SaywordError::Synthesis("no synthesizer configured".into())) })
    }
}
