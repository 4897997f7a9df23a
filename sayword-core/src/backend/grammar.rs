//! Constrained-grammar adapter: streams canonical-rate frames into the
//! grammar worker and waits for its verdict.
//!
//! Ending a session always goes through the stop grace period: caller stop,
//! max-listen, exhausted input and a partial that already matches the target
//! all arm the same timer, and only the timer sends `stop` to the worker.
//! The worker answers with an optional `result` and then `stopped`.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use super::{recorder_for, result_from_transcript, until, ListenRequest, Outcome, RecognitionBackend};
use crate::{
    engine::SessionContext,
    ipc::events::{BackendKind, ListenStatus, RecognitionError, RecognitionErrorKind},
    matcher,
    models::{ModelKind, ModelManager},
    worker::WorkerEvent,
};

pub struct GrammarAdapter {
    models: Arc<ModelManager>,
}

impl GrammarAdapter {
    pub fn new(models: Arc<ModelManager>) -> Self {
        Self { models }
    }
}

impl RecognitionBackend for GrammarAdapter {
    async fn listen(&self, request: &ListenRequest, ctx: &SessionContext) -> Outcome {
        let config = ctx.config();
        let worker = self
            .models
            .worker(ModelKind::Grammar, &request.language)
            .ok_or_else(|| {
                RecognitionError::new(RecognitionErrorKind::ModelLoad, "grammar model is not ready")
            })?;

        let rate = config.canonical_sample_rate;
        let mut capture = ctx.open_capture(Some(rate)).await?;
        let mut session = worker.begin_session(ctx.id());
        session.start(request.grammar_words(), rate)?;
        let mut recorder = recorder_for(request, ctx, rate);

        ctx.emit_status(ListenStatus::Listening);

        let listen_deadline = Instant::now() + config.max_listen();
        let mut grace: Option<Instant> = None;
        let mut capture_live = true;
        let mut stop_sent = false;
        let mut frames_sent = 0usize;

        loop {
            tokio::select! {
                frame = capture.next_frame(), if capture_live && !stop_sent => match frame {
                    Some(frame) => {
                        if !ctx.accepts(&frame) {
                            continue;
                        }
                        if let Some(recorder) = recorder.as_mut() {
                            recorder.push(frame.samples());
                        }
                        session.send_audio(frame.chunk.samples)?;
                        frames_sent += 1;
                    }
                    None => {
                        debug!(session_id = ctx.id(), "input exhausted");
                        capture_live = false;
                        grace.get_or_insert_with(|| Instant::now() + config.stop_grace());
                    }
                },

                event = session.recv() => match event {
                    Some(WorkerEvent::Started { .. }) => {
                        debug!(session_id = ctx.id(), "grammar recognizer started");
                    }
                    Some(WorkerEvent::Partial { text, .. }) => {
                        let hit = request
                            .target
                            .as_deref()
                            .is_some_and(|target| matcher::matches(text.as_str(), target));
                        ctx.emit_partial(text);
                        if hit && grace.is_none() {
                            debug!(session_id = ctx.id(), "partial matched, flushing");
                            grace = Some(Instant::now() + config.stop_grace());
                        }
                    }
                    Some(WorkerEvent::Result { transcript, .. }) => {
                        debug!(session_id = ctx.id(), frames_sent, "grammar result");
                        // Release the recognizer now rather than on drop.
                        let _ = session.stop();
                        return Ok(result_from_transcript(
                            BackendKind::Grammar,
                            transcript,
                            recorder.take().and_then(|r| r.finish()),
                        ));
                    }
                    Some(WorkerEvent::Stopped { .. }) => {
                        debug!(session_id = ctx.id(), frames_sent, "stopped without transcript");
                        return Err(RecognitionError::no_speech());
                    }
                    Some(WorkerEvent::Error { message, .. }) => {
                        return Err(RecognitionError::new(RecognitionErrorKind::Worker, message));
                    }
                    Some(other) => debug!(?other, "unexpected grammar worker event"),
                    None => {
                        return Err(RecognitionError::new(
                            RecognitionErrorKind::Worker,
                            "grammar worker exited",
                        ));
                    }
                },

                _ = ctx.stop_requested(), if grace.is_none() && !stop_sent => {
                    grace = Some(Instant::now() + config.stop_grace());
                }

                _ = until(Some(listen_deadline)), if grace.is_none() && !stop_sent => {
                    debug!(session_id = ctx.id(), "max listen reached");
                    grace = Some(Instant::now() + config.stop_grace());
                }

                _ = until(grace), if !stop_sent => {
                    session.stop()?;
                    stop_sent = true;
                    capture.close();
                }
            }
        }
    }
}
