//! `SpeechEngine`: the recognition session controller.
//!
//! ## Session lifecycle
//!
//! ```text
//! listen()
//!   └─► selecting-backend   grammar (vocabulary + model ready/loading/cached)
//!         │                 → native (supported) → free-form (load on demand)
//!         └─► start cue     played to completion before the microphone opens
//!               └─► backend.listen() under the session ceiling
//!                     └─► exactly one terminal event → stop cue → idle
//! ```
//!
//! Every session runs in its own task. The caller's `RecognitionStream`
//! can `stop()` (finalize, terminal still delivered) or `cancel()` / drop
//! (abort, no terminal). Starting a new session cancels the previous one.
//! Resource release is tied to drops inside the backends, so every exit
//! path (result, error, timeout, cancel) closes audio and worker sessions.

pub mod cancel;
pub mod config;
pub mod cues;
pub mod session;

pub use cancel::{CancelToken, TerminalGate};
pub use config::EngineConfig;
pub use cues::{BoxFuture, Cue, CuePlayer, NoSynthesizer, SilentCues, SpeechSynthesizer};
pub use session::{RecognitionStream, SessionContext};

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::{
    audio::{AudioSource, MicrophoneSource},
    backend::{
        FreeFormAdapter, GrammarAdapter, ListenRequest, NativeAdapter, NativeRecognizer, Outcome,
        RecognitionBackend,
    },
    buffering::chunk::SessionId,
    error::Result,
    ipc::events::{
        BackendKind, EngineStatus, EngineStatusEvent, RecognitionError, RecognitionErrorKind,
        RecognitionEvent,
    },
    matcher,
    models::{ModelKind, ModelManager},
};

/// Broadcast capacity for engine status events.
const STATUS_CAP: usize = 64;

pub struct SpeechEngineBuilder {
    config: EngineConfig,
    models: Arc<ModelManager>,
    audio: Option<Arc<dyn AudioSource>>,
    native: Option<Arc<dyn NativeRecognizer>>,
    cues: Arc<dyn CuePlayer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl SpeechEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to the system microphone.
    pub fn audio_source(mut self, source: Arc<dyn AudioSource>) -> Self {
        self.audio = Some(source);
        self
    }

    pub fn native(mut self, recognizer: Arc<dyn NativeRecognizer>) -> Self {
        self.native = Some(recognizer);
        self
    }

    pub fn cues(mut self, cues: Arc<dyn CuePlayer>) -> Self {
        self.cues = cues;
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn build(self) -> Arc<SpeechEngine> {
        let mut config = self.config;
        config.normalize();
        let (status_tx, _) = broadcast::channel(STATUS_CAP);

        Arc::new(SpeechEngine {
            config: Arc::new(config),
            grammar: GrammarAdapter::new(Arc::clone(&self.models)),
            free_form: FreeFormAdapter::new(Arc::clone(&self.models)),
            native: self.native.map(NativeAdapter::new),
            models: self.models,
            audio: self
                .audio
                .unwrap_or_else(|| Arc::new(MicrophoneSource::new(None))),
            cues: self.cues,
            cue_lock: tokio::sync::Mutex::new(()),
            synthesizer: self.synthesizer,
            next_session: AtomicU64::new(0),
            current_session: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
            playback: Mutex::new(None),
            status: Mutex::new(EngineStatus::Idle),
            status_tx,
        })
    }
}

/// Owned by the host and shared as `Arc<SpeechEngine>`.
pub struct SpeechEngine {
    config: Arc<EngineConfig>,
    models: Arc<ModelManager>,
    audio: Arc<dyn AudioSource>,
    native: Option<NativeAdapter>,
    grammar: GrammarAdapter,
    free_form: FreeFormAdapter,
    cues: Arc<dyn CuePlayer>,
    /// Cues never overlap, so a start cue also waits out the previous stop cue.
    cue_lock: tokio::sync::Mutex<()>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    next_session: AtomicU64,
    /// Session id stamped onto captured frames.
    current_session: Arc<AtomicU64>,
    active: Mutex<Option<CancelToken>>,
    playback: Mutex<Option<CancelToken>>,
    status: Mutex<EngineStatus>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
}

impl SpeechEngine {
    pub fn builder(models: Arc<ModelManager>) -> SpeechEngineBuilder {
        SpeechEngineBuilder {
            config: EngineConfig::default(),
            models,
            audio: None,
            native: None,
            cues: Arc::new(SilentCues),
            synthesizer: Arc::new(NoSynthesizer),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Start a session. Any session still running is cancelled, and so is
    /// speech playback.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn listen(self: &Arc<Self>, request: ListenRequest) -> RecognitionStream {
        let id = self.next_session.fetch_add(1, Ordering::AcqRel) + 1;
        self.current_session.store(id, Ordering::Release);
        self.stop_speaking();

        let cancel = CancelToken::new();
        let stop = CancelToken::new();
        if let Some(previous) = self.active.lock().replace(cancel.clone()) {
            debug!(session_id = id, "superseding previous session");
            previous.cancel();
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let span = info_span!("session", session_id = id, backend = tracing::field::Empty);
        let engine = Arc::clone(self);
        let drive_cancel = cancel.clone();
        let drive_stop = stop.clone();
        tokio::spawn(
            async move { engine.drive(id, request, events_tx, drive_stop, drive_cancel).await }
                .instrument(span),
        );

        RecognitionStream::new(id, events_rx, stop, cancel)
    }

    /// Cancel the running session, if any.
    pub fn cancel_active(&self) {
        if let Some(token) = self.active.lock().take() {
            token.cancel();
        }
    }

    /// Speak `text`, replacing any playback in progress. Resolves when
    /// playback ends or is stopped.
    pub async fn speak(&self, text: &str, language: &str) -> Result<()> {
        let token = CancelToken::new();
        if let Some(previous) = self.playback.lock().replace(token.clone()) {
            previous.cancel();
        }
        self.publish(EngineStatus::Speaking, None, None, None);

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                debug!("speech playback stopped");
                Ok(())
            }
            result = self.synthesizer.speak(text, language) => result,
        };

        let mut playback = self.playback.lock();
        if playback.as_ref().is_some_and(|t| t.same_as(&token)) {
            *playback = None;
        }
        let idle = playback.is_none();
        drop(playback);
        // A session may have taken over the status in the meantime.
        if idle && self.status() == EngineStatus::Speaking {
            self.publish(EngineStatus::Idle, None, None, None);
        }
        outcome
    }

    /// Idempotent.
    pub fn stop_speaking(&self) {
        if let Some(token) = self.playback.lock().take() {
            token.cancel();
        }
    }

    async fn drive(
        self: Arc<Self>,
        id: SessionId,
        request: ListenRequest,
        events: mpsc::UnboundedSender<RecognitionEvent>,
        stop: CancelToken,
        cancel: CancelToken,
    ) {
        info!(
            language = request.language.as_str(),
            target = request.target.as_deref().unwrap_or(""),
            vocabulary = request.vocabulary.as_ref().map_or(0, Vec::len),
            "listen"
        );
        let gate = Arc::new(TerminalGate::new());
        let mut cue_played = false;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = self.run_session(id, &request, &events, &gate, &stop, &mut cue_played) => {
                Some(outcome)
            }
        };

        match outcome {
            None => debug!("session cancelled"),
            Some(outcome) => {
                let outcome = attach_match(outcome, &request);
                match &outcome {
                    Ok(result) => info!(
                        transcript = result.transcript.as_str(),
                        matched = result.is_match(),
                        "session result"
                    ),
                    Err(error) => info!(kind = ?error.kind, "session error: {}", error.message),
                }
                if gate.try_finish() {
                    let event = match outcome {
                        Ok(result) => RecognitionEvent::Result(result),
                        Err(error) => RecognitionEvent::Error(error),
                    };
                    let _ = events.send(event);
                }
                if cue_played {
                    self.play_cue(Cue::ListeningStopped).await;
                }
            }
        }
        drop(events);

        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|t| t.same_as(&cancel)) {
            *active = None;
            drop(active);
            self.publish(EngineStatus::Idle, Some(id), None, None);
        }
    }

    async fn run_session(
        &self,
        id: SessionId,
        request: &ListenRequest,
        events: &mpsc::UnboundedSender<RecognitionEvent>,
        gate: &Arc<TerminalGate>,
        stop: &CancelToken,
        cue_played: &mut bool,
    ) -> Outcome {
        self.publish(EngineStatus::SelectingBackend, Some(id), None, None);
        let backend = self.select_backend(request).await?;
        Span::current().record("backend", backend.as_str());
        debug!("backend selected");

        let ctx = SessionContext::new(
            id,
            backend,
            events.clone(),
            Arc::clone(gate),
            stop.clone(),
            Arc::clone(&self.current_session),
            Arc::clone(&self.audio),
            Arc::clone(&self.config),
            self.status_tx.clone(),
        );

        // The microphone must not hear the cue.
        self.play_cue(Cue::ListeningStarted).await;
        *cue_played = true;

        let ceiling = self.config.session_ceiling();
        match tokio::time::timeout(ceiling, self.run_backend(backend, request, &ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(ceiling_ms = ceiling.as_millis() as u64, "session hit its hard ceiling");
                Err(RecognitionError::timeout())
            }
        }
    }

    async fn select_backend(&self, request: &ListenRequest) -> std::result::Result<BackendKind, RecognitionError> {
        let language = request.language.as_str();

        if request.grammar_words().is_some() && self.models.is_available(ModelKind::Grammar, language) {
            match self.models.wait_ready(ModelKind::Grammar, language).await {
                Ok(()) => return Ok(BackendKind::Grammar),
                Err(e) => warn!(language, "grammar model unavailable, falling back: {e}"),
            }
        }

        if self.native.as_ref().is_some_and(NativeAdapter::is_supported) {
            return Ok(BackendKind::Native);
        }

        match self.models.wait_ready(ModelKind::FreeForm, language).await {
            Ok(()) => Ok(BackendKind::FreeForm),
            Err(e) => Err(RecognitionError::new(
                RecognitionErrorKind::ModelLoad,
                format!("no recognition backend available: {e}"),
            )),
        }
    }

    async fn run_backend(&self, backend: BackendKind, request: &ListenRequest, ctx: &SessionContext) -> Outcome {
        match backend {
            BackendKind::Native => match &self.native {
                Some(native) => native.listen(request, ctx).await,
                None => Err(RecognitionError::new(
                    RecognitionErrorKind::Unsupported,
                    "no native recognizer",
                )),
            },
            BackendKind::Grammar => self.grammar.listen(request, ctx).await,
            BackendKind::FreeForm => self.free_form.listen(request, ctx).await,
        }
    }

    async fn play_cue(&self, cue: Cue) {
        let _serial = self.cue_lock.lock().await;
        if let Err(e) = self.cues.play(cue).await {
            debug!(?cue, "cue failed: {e}");
        }
    }

    fn publish(
        &self,
        status: EngineStatus,
        session_id: Option<SessionId>,
        backend: Option<BackendKind>,
        detail: Option<String>,
    ) {
        *self.status.lock() = status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status,
            session_id,
            backend,
            detail,
        });
    }
}

/// Attach match evidence when the caller gave a target and the backend
/// did not already decide.
fn attach_match(outcome: Outcome, request: &ListenRequest) -> Outcome {
    let mut result = outcome?;
    if result.matched.is_none() {
        if let Some(target) = request.target.as_deref() {
            let evidence = matcher::evaluate(&result.candidates(), target);
            result.matched = Some(evidence);
        }
    }
    Ok(result)
}

impl std::fmt::Debug for SpeechEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechEngine")
            .field("status", &self.status())
            .field("current_session", &self.current_session.load(Ordering::Acquire))
            .field("native", &self.native.is_some())
            .finish()
    }
}
