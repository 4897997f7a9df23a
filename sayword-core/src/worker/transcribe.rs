//! Free-form transcription worker loop.
//!
//! The model is language-agnostic; each `transcribe` carries a language hint.
//! Exactly one `result` or `error` answers every `transcribe`.

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use super::{EventSink, ProgressFn, Transcript, WorkerCommand, WorkerEvent};
use crate::{error::Result, models::assets::ModelSource};

pub trait Transcriber: Send {
    /// `samples` are mono f32 at the rate the loader was built for.
    fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<Transcript>;

    /// Sample rate the model expects.
    fn sample_rate(&self) -> u32 {
        16_000
    }
}

pub trait TranscriberLoader: Send + Sync + 'static {
    fn load(&self, source: &ModelSource, progress: ProgressFn<'_>) -> Result<Box<dyn Transcriber>>;
}

pub fn run(loader: &dyn TranscriberLoader, commands: Receiver<WorkerCommand>, sink: EventSink) {
    let mut model: Option<Box<dyn Transcriber>> = None;

    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Load { language, source } => {
                if model.is_some() {
                    // One model serves every language.
                    sink.emit(WorkerEvent::Ready { language });
                    continue;
                }
                let mut report = |p: f32| {
                    sink.emit(WorkerEvent::Progress {
                        language: language.clone(),
                        progress: p,
                    })
                };
                match loader.load(&source, &mut report) {
                    Ok(loaded) => {
                        info!("transcription model ready");
                        model = Some(loaded);
                        sink.emit(WorkerEvent::Ready { language });
                    }
                    Err(e) => {
                        warn!("transcription model load failed: {e}");
                        sink.emit(WorkerEvent::load_error(language, e.to_string()));
                    }
                }
            }

            WorkerCommand::Transcribe {
                session_id,
                samples,
                sample_rate,
                language,
            } => {
                let Some(model) = model.as_mut() else {
                    sink.emit(WorkerEvent::session_error(session_id, "no model loaded"));
                    continue;
                };
                if sample_rate != model.sample_rate() {
                    sink.emit(WorkerEvent::session_error(
                        session_id,
                        format!("expected {} Hz audio, got {sample_rate} Hz", model.sample_rate()),
                    ));
                    continue;
                }

                let started = std::time::Instant::now();
                match model.transcribe(&samples, &language) {
                    Ok(transcript) => {
                        debug!(
                            session_id,
                            samples = samples.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "transcribed"
                        );
                        sink.emit(WorkerEvent::Result {
                            session_id,
                            transcript,
                        });
                    }
                    Err(e) => sink.emit(WorkerEvent::session_error(session_id, e.to_string())),
                }
            }

            WorkerCommand::Start { session_id, .. } => sink.emit(WorkerEvent::session_error(
                session_id,
                "transcription worker has no streaming sessions",
            )),
            WorkerCommand::Audio { .. } => {}
            WorkerCommand::Stop { session_id } => sink.emit(WorkerEvent::Stopped { session_id }),
            WorkerCommand::Shutdown => break,
        }
    }
}
