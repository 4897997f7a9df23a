//! Per-session state handed to backends, and the caller's end of a session.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use super::{
    cancel::{CancelToken, TerminalGate},
    config::EngineConfig,
};
use crate::{
    audio::{self, AudioSource, CaptureOptions, CaptureSession},
    buffering::chunk::{AudioFrame, SessionId},
    error::Result,
    ipc::events::{
        BackendKind, EngineStatus, EngineStatusEvent, ListenStatus, RecognitionEvent,
    },
};

/// What one session owns. Backends get it by reference.
pub struct SessionContext {
    id: SessionId,
    backend: BackendKind,
    events: mpsc::UnboundedSender<RecognitionEvent>,
    gate: Arc<TerminalGate>,
    stop: CancelToken,
    current: Arc<AtomicU64>,
    audio: Arc<dyn AudioSource>,
    config: Arc<EngineConfig>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
}

impl SessionContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: SessionId,
        backend: BackendKind,
        events: mpsc::UnboundedSender<RecognitionEvent>,
        gate: Arc<TerminalGate>,
        stop: CancelToken,
        current: Arc<AtomicU64>,
        audio: Arc<dyn AudioSource>,
        config: Arc<EngineConfig>,
        status_tx: broadcast::Sender<EngineStatusEvent>,
    ) -> Self {
        Self {
            id,
            backend,
            events,
            gate,
            stop,
            current,
            audio,
            config,
            status_tx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn emit_status(&self, status: ListenStatus) {
        if self.gate.is_finished() {
            return;
        }
        let _ = self.events.send(RecognitionEvent::Status { status });
        let engine_status = match status {
            ListenStatus::Listening => EngineStatus::Listening,
            ListenStatus::Processing => EngineStatus::Processing,
        };
        let _ = self.status_tx.send(EngineStatusEvent {
            status: engine_status,
            session_id: Some(self.id),
            backend: Some(self.backend),
            detail: None,
        });
    }

    pub fn emit_partial(&self, text: impl Into<String>) {
        if self.gate.is_finished() {
            return;
        }
        let _ = self.events.send(RecognitionEvent::Partial { text: text.into() });
    }

    /// The caller asked to finalize now.
    pub async fn stop_requested(&self) {
        self.stop.cancelled().await
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// `true` if `frame` belongs to this session and this session is still
    /// the controller's current one.
    pub fn accepts(&self, frame: &AudioFrame) -> bool {
        let current = self.current.load(Ordering::Acquire);
        let ok = frame.session_id == self.id && current == self.id;
        if !ok {
            trace!(
                frame_session = frame.session_id,
                session_id = self.id,
                current,
                "stale frame dropped"
            );
        }
        ok
    }

    /// Open the session's audio source. `None` keeps the device rate.
    pub async fn open_capture(&self, target_rate: Option<u32>) -> Result<CaptureSession> {
        audio::open_capture(
            Arc::clone(&self.audio),
            CaptureOptions {
                target_rate,
                frame_samples: self.config.frame_samples,
            },
            Arc::clone(&self.current),
        )
        .await
    }
}

/// The caller's view of one session: zero or more status/partial events,
/// then exactly one terminal event, unless cancelled.
///
/// Dropping the stream cancels the session.
pub struct RecognitionStream {
    session_id: SessionId,
    events: mpsc::UnboundedReceiver<RecognitionEvent>,
    stop: CancelToken,
    cancel: CancelToken,
    done: bool,
}

impl RecognitionStream {
    pub(crate) fn new(
        session_id: SessionId,
        events: mpsc::UnboundedReceiver<RecognitionEvent>,
        stop: CancelToken,
        cancel: CancelToken,
    ) -> Self {
        Self {
            session_id,
            events,
            stop,
            cancel,
            done: false,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Next event; `None` after the terminal event or once cancelled.
    pub async fn next(&mut self) -> Option<RecognitionEvent> {
        if self.done {
            return None;
        }
        let event = self.events.recv().await;
        match &event {
            Some(e) if e.is_terminal() => self.done = true,
            None => self.done = true,
            _ => {}
        }
        event
    }

    /// Finalize with whatever has been heard so far. A terminal event still
    /// follows.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Abort. No terminal event follows; resources are released.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.events.close();
        self.done = true;
    }

    /// Skip to the terminal event.
    pub async fn terminal(mut self) -> Option<RecognitionEvent> {
        while let Some(event) = self.next().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    }

    /// Every remaining event, terminal last.
    pub async fn collect(mut self) -> Vec<RecognitionEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.next().await {
            out.push(event);
        }
        out
    }
}

impl Drop for RecognitionStream {
    fn drop(&mut self) {
        if !self.done {
            self.cancel.cancel();
        }
    }
}
