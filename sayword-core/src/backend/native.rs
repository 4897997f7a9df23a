//! Adapter over the platform's own continuous speech recognizer.
//!
//! The host implements [`NativeRecognizer`]. The adapter asks for interim
//! results with a large n-best list and stops at the first alternative that
//! matches the target, without waiting for the recognizer's final signal.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    next_frame, recorder_for, result_from_transcript, until, ListenRequest, Outcome,
    RecognitionBackend,
};
use crate::{
    engine::SessionContext,
    ipc::events::{
        Alternative, BackendKind, ListenStatus, RecognitionError, RecognitionErrorKind,
    },
    matcher,
    worker::Transcript,
};

#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    Started,
    /// Best first.
    Result {
        alternatives: Vec<Alternative>,
        is_final: bool,
    },
    Error(NativeErrorCode),
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeErrorCode {
    NoSpeech,
    Aborted,
    AudioCapture,
    NotAllowed,
    Network,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeOptions {
    pub language: String,
    pub continuous: bool,
    pub interim_results: bool,
    pub max_alternatives: u32,
}

#[derive(Debug, Error)]
pub enum NativeStartError {
    #[error("recognizer already started")]
    AlreadyStarted,
    #[error("microphone not allowed: {0}")]
    NotAllowed(String),
    #[error("recognizer unavailable: {0}")]
    Unavailable(String),
}

pub trait NativeRecognizer: Send + Sync + 'static {
    fn is_supported(&self) -> bool;

    /// Events of every recognition run from now on.
    fn subscribe(&self) -> broadcast::Receiver<NativeEvent>;

    fn start(&self, options: &NativeOptions) -> Result<(), NativeStartError>;

    /// Ask the recognizer to wrap up; it answers with `Ended`. Idempotent.
    fn stop(&self);
}

/// Stops the recognizer on every exit path.
struct StopOnDrop<'a>(&'a dyn NativeRecognizer);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

pub struct NativeAdapter {
    recognizer: Arc<dyn NativeRecognizer>,
}

impl NativeAdapter {
    pub fn new(recognizer: Arc<dyn NativeRecognizer>) -> Self {
        Self { recognizer }
    }

    pub fn is_supported(&self) -> bool {
        self.recognizer.is_supported()
    }
}

impl RecognitionBackend for NativeAdapter {
    async fn listen(&self, request: &ListenRequest, ctx: &SessionContext) -> Outcome {
        let config = ctx.config();
        let mut events = self.recognizer.subscribe();
        let options = NativeOptions {
            language: request.language.clone(),
            continuous: true,
            interim_results: true,
            max_alternatives: config.native_max_alternatives,
        };

        match self.recognizer.start(&options) {
            Ok(()) => {}
            Err(NativeStartError::AlreadyStarted) => {
                debug!(session_id = ctx.id(), "native recognizer already listening");
            }
            Err(NativeStartError::NotAllowed(message)) => {
                return Err(RecognitionError::new(
                    RecognitionErrorKind::PermissionDenied,
                    message,
                ))
            }
            Err(NativeStartError::Unavailable(message)) => {
                return Err(RecognitionError::new(RecognitionErrorKind::Unsupported, message))
            }
        }
        let _stop = StopOnDrop(self.recognizer.as_ref());

        // The platform owns the microphone; the blob comes from our own
        // parallel capture and is optional.
        let mut blob_capture = None;
        let mut recorder = None;
        if request.capture_audio {
            match ctx.open_capture(None).await {
                Ok(capture) => {
                    recorder = recorder_for(request, ctx, capture.sample_rate());
                    blob_capture = Some(capture);
                }
                Err(e) => debug!("blob capture unavailable: {e}"),
            }
        }

        ctx.emit_status(ListenStatus::Listening);

        let mut deadline = Instant::now() + config.max_listen();
        let mut stopping = false;
        let mut best: Option<(Vec<Alternative>, bool)> = None;
        let mut last_error = None;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(NativeEvent::Started) => {}
                    Ok(NativeEvent::Result { alternatives, is_final }) => {
                        let alternatives: Vec<Alternative> = alternatives
                            .into_iter()
                            .filter(|a| !a.text.trim().is_empty())
                            .collect();
                        let Some(top) = alternatives.first() else { continue };
                        if !is_final {
                            ctx.emit_partial(top.text.clone());
                        }

                        if let Some(target) = request.target.as_deref() {
                            let texts: Vec<&str> = alternatives.iter().map(|a| a.text.as_str()).collect();
                            let evidence = matcher::evaluate(&texts, target);
                            if evidence.matched {
                                debug!(session_id = ctx.id(), is_final, "early match");
                                let mut result = result_from_transcript(
                                    BackendKind::Native,
                                    to_transcript(alternatives),
                                    finish_blob(recorder.take()),
                                );
                                result.matched = Some(evidence);
                                return Ok(result);
                            }
                        }

                        let keep_previous_final = best.as_ref().is_some_and(|(_, f)| *f) && !is_final;
                        if !keep_previous_final {
                            best = Some((alternatives, is_final));
                        }
                    }
                    Ok(NativeEvent::Error(code)) => match code {
                        NativeErrorCode::NoSpeech | NativeErrorCode::Aborted => {}
                        NativeErrorCode::NotAllowed => {
                            return Err(RecognitionError::new(
                                RecognitionErrorKind::PermissionDenied,
                                "microphone access was refused",
                            ))
                        }
                        NativeErrorCode::AudioCapture => {
                            return Err(RecognitionError::new(
                                RecognitionErrorKind::Audio,
                                "native recognizer could not capture audio",
                            ))
                        }
                        other => {
                            warn!(session_id = ctx.id(), ?other, "native recognizer error");
                            last_error = Some(other);
                        }
                    },
                    Ok(NativeEvent::Ended) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "native events lagged");
                    }
                },

                _ = ctx.stop_requested(), if !stopping => {
                    stopping = true;
                    self.recognizer.stop();
                    deadline = Instant::now() + config.stop_grace();
                }

                _ = until(Some(deadline)) => {
                    if stopping {
                        debug!(session_id = ctx.id(), "no end event after stop");
                        break;
                    }
                    debug!(session_id = ctx.id(), "max listen reached");
                    stopping = true;
                    self.recognizer.stop();
                    deadline = Instant::now() + config.stop_grace();
                }

                frame = next_frame(&mut blob_capture) => match frame {
                    Some(frame) if ctx.accepts(&frame) => {
                        if let Some(recorder) = recorder.as_mut() {
                            recorder.push(frame.samples());
                        }
                    }
                    Some(_) => {}
                    None => blob_capture = None,
                },
            }
        }

        match best {
            Some((alternatives, _)) => Ok(result_from_transcript(
                BackendKind::Native,
                to_transcript(alternatives),
                finish_blob(recorder.take()),
            )),
            None => match last_error {
                Some(code) => Err(RecognitionError::new(
                    RecognitionErrorKind::Worker,
                    format!("native recognizer failed: {code:?}"),
                )),
                None => Err(RecognitionError::no_speech()),
            },
        }
    }
}

fn to_transcript(alternatives: Vec<Alternative>) -> Transcript {
    let text = alternatives
        .first()
        .map(|a| a.text.trim().to_string())
        .unwrap_or_default();
    let confidence = alternatives.first().and_then(|a| a.confidence);
    Transcript {
        text,
        alternatives,
        confidence,
    }
}

fn finish_blob(recorder: Option<crate::audio::BlobRecorder>) -> Option<Vec<u8>> {
    recorder.and_then(|r| r.finish())
}
