//! Constrained-grammar worker loop.
//!
//! The loaded model lives for the whole worker; each session owns its own
//! recognizer in a map keyed by session id. A new `start` supersedes every
//! older session, and audio for an unknown session is ignored.

use std::collections::HashMap;

use crossbeam_channel::Receiver;
use tracing::{debug, info, trace, warn};

use super::{EventSink, ProgressFn, Transcript, WorkerCommand, WorkerEvent};
use crate::{
    buffering::chunk::{to_pcm16, SessionId},
    error::Result,
    models::assets::ModelSource,
};

/// Result of feeding audio to a streaming recognizer.
#[derive(Debug, Clone, PartialEq)]
pub enum Decode {
    /// Nothing new.
    Running,
    /// Hypothesis so far.
    Partial(String),
    /// The recognizer detected an utterance end on its own.
    Final(Transcript),
}

pub trait GrammarRecognizer: Send {
    fn accept(&mut self, pcm: &[i16]) -> Result<Decode>;

    /// Flush buffered audio and return the final hypothesis.
    fn finish(&mut self) -> Transcript;
}

pub trait GrammarModel: Send {
    /// `None` means the model's full vocabulary.
    fn recognizer(
        &self,
        vocabulary: Option<&[String]>,
        sample_rate: u32,
    ) -> Result<Box<dyn GrammarRecognizer>>;
}

pub trait GrammarModelLoader: Send + Sync + 'static {
    fn load(
        &self,
        language: &str,
        source: &ModelSource,
        progress: ProgressFn<'_>,
    ) -> Result<Box<dyn GrammarModel>>;
}

struct SessionContext {
    recognizer: Box<dyn GrammarRecognizer>,
    last_partial: Option<String>,
}

/// Runs until the command channel closes or `Shutdown` arrives.
pub fn run(loader: &dyn GrammarModelLoader, commands: Receiver<WorkerCommand>, sink: EventSink) {
    let mut model: Option<(String, Box<dyn GrammarModel>)> = None;
    let mut sessions: HashMap<SessionId, SessionContext> = HashMap::new();

    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Load { language, source } => {
                sessions.clear();
                model = None;
                let mut report = |p: f32| {
                    sink.emit(WorkerEvent::Progress {
                        language: language.clone(),
                        progress: p,
                    })
                };
                match loader.load(&language, &source, &mut report) {
                    Ok(loaded) => {
                        info!(language = language.as_str(), "grammar model ready");
                        model = Some((language.clone(), loaded));
                        sink.emit(WorkerEvent::Ready { language });
                    }
                    Err(e) => {
                        warn!(language = language.as_str(), "grammar model load failed: {e}");
                        sink.emit(WorkerEvent::load_error(language, e.to_string()));
                    }
                }
            }

            WorkerCommand::Start {
                session_id,
                vocabulary,
                sample_rate,
            } => {
                let Some((language, loaded)) = model.as_ref() else {
                    sink.emit(WorkerEvent::session_error(session_id, "no model loaded"));
                    continue;
                };
                if !sessions.is_empty() {
                    debug!(superseded = sessions.len(), "dropping older sessions");
                    sessions.clear();
                }

                let vocabulary = vocabulary.filter(|v| !v.is_empty());
                match loaded.recognizer(vocabulary.as_deref(), sample_rate) {
                    Ok(recognizer) => {
                        debug!(
                            session_id,
                            language = language.as_str(),
                            words = vocabulary.as_ref().map_or(0, Vec::len),
                            "recognizer created"
                        );
                        sessions.insert(
                            session_id,
                            SessionContext {
                                recognizer,
                                last_partial: None,
                            },
                        );
                        sink.emit(WorkerEvent::Started { session_id });
                    }
                    Err(e) => sink.emit(WorkerEvent::session_error(session_id, e.to_string())),
                }
            }

            WorkerCommand::Audio {
                session_id,
                samples,
            } => {
                let Some(ctx) = sessions.get_mut(&session_id) else {
                    trace!(session_id, "audio for unknown session ignored");
                    continue;
                };
                match ctx.recognizer.accept(&to_pcm16(&samples)) {
                    Ok(Decode::Running) => {}
                    Ok(Decode::Partial(text)) => {
                        if !text.is_empty() && ctx.last_partial.as_deref() != Some(text.as_str()) {
                            ctx.last_partial = Some(text.clone());
                            sink.emit(WorkerEvent::Partial { session_id, text });
                        }
                    }
                    Ok(Decode::Final(transcript)) => {
                        if !transcript.is_empty() {
                            sink.emit(WorkerEvent::Result {
                                session_id,
                                transcript,
                            });
                        }
                    }
                    Err(e) => {
                        sessions.remove(&session_id);
                        sink.emit(WorkerEvent::session_error(session_id, e.to_string()));
                    }
                }
            }

            WorkerCommand::Stop { session_id } => {
                if let Some(mut ctx) = sessions.remove(&session_id) {
                    let transcript = ctx.recognizer.finish();
                    if !transcript.is_empty() {
                        sink.emit(WorkerEvent::Result {
                            session_id,
                            transcript,
                        });
                    }
                    debug!(session_id, "recognizer released");
                }
                sink.emit(WorkerEvent::Stopped { session_id });
            }

            WorkerCommand::Transcribe { session_id, .. } => {
                sink.emit(WorkerEvent::session_error(
                    session_id,
                    "grammar worker does not transcribe",
                ));
            }

            WorkerCommand::Shutdown => break,
        }
    }
}
