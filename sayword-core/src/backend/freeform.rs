//! Free-form adapter: record at the device rate until the endpointer says
//! the utterance is over, then hand the whole clip to the transcription
//! worker in one job.

use std::sync::Arc;

use tracing::debug;

use super::{recorder_for, result_from_transcript, ListenRequest, Outcome, RecognitionBackend};
use crate::{
    audio::resample::resample_offline,
    engine::SessionContext,
    ipc::events::{BackendKind, ListenStatus, RecognitionError, RecognitionErrorKind},
    models::{ModelKind, ModelManager},
    vad::{EndpointDecision, EnergyVad, FinalizeReason, SpeechEndpointer},
    worker::WorkerEvent,
};

pub struct FreeFormAdapter {
    models: Arc<ModelManager>,
}

impl FreeFormAdapter {
    pub fn new(models: Arc<ModelManager>) -> Self {
        Self { models }
    }
}

impl RecognitionBackend for FreeFormAdapter {
    async fn listen(&self, request: &ListenRequest, ctx: &SessionContext) -> Outcome {
        let config = ctx.config();
        let worker = self
            .models
            .worker(ModelKind::FreeForm, &request.language)
            .ok_or_else(|| {
                RecognitionError::new(
                    RecognitionErrorKind::ModelLoad,
                    "transcription model is not ready",
                )
            })?;

        let mut capture = ctx.open_capture(None).await?;
        let capture_rate = capture.sample_rate();
        let mut endpointer = SpeechEndpointer::new(
            EnergyVad::new(config.vad_threshold),
            capture_rate,
            config.trailing_silence(),
            config.max_speech(),
        );
        let mut recorder = recorder_for(request, ctx, capture_rate);
        let mut buffered: Vec<f32> = Vec::new();

        ctx.emit_status(ListenStatus::Listening);

        let reason = loop {
            tokio::select! {
                frame = capture.next_frame() => match frame {
                    Some(frame) => {
                        if !ctx.accepts(&frame) {
                            continue;
                        }
                        if let Some(recorder) = recorder.as_mut() {
                            recorder.push(frame.samples());
                        }
                        buffered.extend_from_slice(frame.samples());
                        if let EndpointDecision::Finalize(reason) = endpointer.feed(&frame.chunk) {
                            break reason;
                        }
                    }
                    None => break end_of_input(&endpointer),
                },
                _ = ctx.stop_requested() => break end_of_input(&endpointer),
            }
        };
        capture.close();
        debug!(
            session_id = ctx.id(),
            ?reason,
            samples = buffered.len(),
            "utterance finalized"
        );

        if reason == FinalizeReason::NoSpeech {
            return Err(RecognitionError::no_speech());
        }

        ctx.emit_status(ListenStatus::Processing);

        let model_rate = config.canonical_sample_rate;
        let samples = if capture_rate == model_rate {
            buffered
        } else {
            resample_offline(&buffered, capture_rate, model_rate)?
        };

        let mut session = worker.begin_session(ctx.id());
        session.transcribe(samples, model_rate, &request.language)?;

        let reply = tokio::time::timeout(config.transcribe_timeout(), async {
            loop {
                match session.recv().await {
                    Some(WorkerEvent::Result { transcript, .. }) => break Ok(transcript),
                    Some(WorkerEvent::Error { message, .. }) => {
                        break Err(RecognitionError::new(RecognitionErrorKind::Worker, message))
                    }
                    Some(_) => continue,
                    None => {
                        break Err(RecognitionError::new(
                            RecognitionErrorKind::Worker,
                            "transcription worker exited",
                        ))
                    }
                }
            }
        })
        .await
        .map_err(|_| RecognitionError::timeout())??;

        if reply.is_empty() {
            return Err(RecognitionError::no_speech());
        }
        Ok(result_from_transcript(
            BackendKind::FreeForm,
            reply,
            recorder.take().and_then(|r| r.finish()),
        ))
    }
}

fn end_of_input(endpointer: &SpeechEndpointer<EnergyVad>) -> FinalizeReason {
    if endpointer.speech_started() {
        FinalizeReason::TrailingSilence
    } else {
        FinalizeReason::NoSpeech
    }
}
