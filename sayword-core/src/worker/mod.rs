//! Background worker threads hosting offline models.
//!
//! ```text
//!   WorkerSession ──WorkerCommand──► crossbeam ──► worker thread (model, per-session map)
//!        ▲                                                   │
//!        └──── mpsc ◄── Router (drops stale sessions) ◄── EventSink::emit
//! ```
//!
//! One [`WorkerHost`] per offline backend. The model loaded inside it stays
//! resident across sessions; only recognizers are per session. The router
//! runs on the worker thread itself, so there is no extra hop.

pub mod grammar;
pub mod protocol;
pub mod transcribe;

#[cfg(feature = "vosk")]
pub mod vosk;

#[cfg(feature = "whisper")]
pub mod whisper;

pub use grammar::{Decode, GrammarModel, GrammarModelLoader, GrammarRecognizer};
pub use protocol::{Transcript, WorkerCommand, WorkerEvent};
pub use transcribe::{Transcriber, TranscriberLoader};

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::{
    buffering::chunk::SessionId,
    error::{Result, SaywordError},
    models::assets::ModelSource,
};

/// Load progress callback handed to engine loaders.
pub type ProgressFn<'a> = &'a mut dyn FnMut(f32);

struct PendingLoad {
    sequence: u64,
    language: String,
    done: oneshot::Sender<std::result::Result<(), String>>,
    progress: Option<mpsc::UnboundedSender<f32>>,
}

/// Loads are answered in the order they were sent, one `Ready` or load
/// error each, so outcomes are matched by position rather than language.
#[derive(Default)]
struct LoadQueue {
    sent: u64,
    answered: u64,
    pending: Option<PendingLoad>,
}

/// Delivers worker events to whoever is waiting for them.
struct Router {
    sessions: Mutex<HashMap<SessionId, mpsc::UnboundedSender<WorkerEvent>>>,
    active_session: AtomicU64,
    loads: Mutex<LoadQueue>,
    alive: AtomicBool,
}

impl Router {
    fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            active_session: AtomicU64::new(0),
            loads: Mutex::new(LoadQueue::default()),
            alive: AtomicBool::new(true),
        }
    }

    fn dispatch(&self, event: WorkerEvent) {
        match &event {
            WorkerEvent::Progress { progress, .. } => {
                let loads = self.loads.lock();
                if let Some(pending) = loads.pending.as_ref() {
                    if pending.sequence == loads.answered + 1 {
                        if let Some(tx) = &pending.progress {
                            let _ = tx.send(*progress);
                        }
                    }
                }
                return;
            }
            WorkerEvent::Ready { language } => {
                self.finish_load(language, Ok(()));
                return;
            }
            WorkerEvent::Error {
                session_id: None,
                language,
                message,
            } => {
                self.finish_load(language.as_deref().unwrap_or(""), Err(message.clone()));
                return;
            }
            _ => {}
        }

        let Some(session_id) = event.session_id() else {
            return;
        };
        let active = self.active_session.load(Ordering::Acquire);
        if session_id != active {
            debug!(session_id, active, "dropping stale worker event");
            return;
        }
        match self.sessions.lock().get(&session_id) {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => trace!(session_id, "worker event for finished session"),
        }
    }

    /// Count one answered load and resolve the pending one if this answer
    /// is its own.
    fn finish_load(&self, language: &str, outcome: std::result::Result<(), String>) {
        let mut loads = self.loads.lock();
        loads.answered += 1;
        let answered = loads.answered;
        if loads.pending.as_ref().map(|p| p.sequence) != Some(answered) {
            debug!(language, "load outcome for a superseded request");
            return;
        }
        if let Some(p) = loads.pending.take() {
            debug!(language = p.language.as_str(), "load answered");
            let _ = p.done.send(outcome);
        }
    }

    fn fail_all(&self, reason: &str) {
        self.alive.store(false, Ordering::Release);
        if let Some(p) = self.loads.lock().pending.take() {
            let _ = p.done.send(Err(reason.to_string()));
        }
        for (session_id, tx) in self.sessions.lock().drain() {
            let _ = tx.send(WorkerEvent::session_error(session_id, reason));
        }
    }
}

/// Worker-side handle for emitting events.
#[derive(Clone)]
pub struct EventSink {
    router: Arc<Router>,
}

impl EventSink {
    pub fn emit(&self, event: WorkerEvent) {
        self.router.dispatch(event);
    }
}

/// Fails everything still waiting when the worker thread exits, including
/// by panic.
struct ExitGuard {
    name: &'static str,
    router: Arc<Router>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(worker = self.name, "worker thread panicked");
        } else {
            debug!(worker = self.name, "worker thread exited");
        }
        self.router.fail_all("worker exited");
    }
}

/// Owns one worker thread.
pub struct WorkerHost {
    name: &'static str,
    commands: Sender<WorkerCommand>,
    router: Arc<Router>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHost {
    /// Spawn a worker thread running `body` until its command channel closes.
    pub fn spawn<F>(name: &'static str, body: F) -> Result<Self>
    where
        F: FnOnce(Receiver<WorkerCommand>, EventSink) + Send + 'static,
    {
        let (commands, rx) = crossbeam_channel::unbounded();
        let router = Arc::new(Router::new());
        let sink = EventSink {
            router: Arc::clone(&router),
        };
        let guard = ExitGuard {
            name,
            router: Arc::clone(&router),
        };

        let thread = std::thread::Builder::new()
            .name(format!("sayword-{name}"))
            .spawn(move || {
                let _guard = guard;
                body(rx, sink);
            })?;

        debug!(worker = name, "worker spawned");
        Ok(Self {
            name,
            commands,
            router,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_alive(&self) -> bool {
        self.router.alive.load(Ordering::Acquire)
    }

    /// Ask the worker to load `language`, resolving once it reports ready.
    ///
    /// A newer `load` supersedes this one; the older call then fails.
    pub async fn load(
        &self,
        language: &str,
        source: ModelSource,
        progress: Option<mpsc::UnboundedSender<f32>>,
    ) -> Result<()> {
        self.begin_load(language, source, progress)?.wait().await
    }

    /// Install the pending load and send `Load` without awaiting it.
    ///
    /// Commands reach the worker in call order, so the last caller of
    /// `begin_load` decides which model the worker ends up holding.
    pub fn begin_load(
        &self,
        language: &str,
        source: ModelSource,
        progress: Option<mpsc::UnboundedSender<f32>>,
    ) -> Result<LoadTicket> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut loads = self.router.loads.lock();
        self.send(WorkerCommand::Load {
            language: language.to_string(),
            source,
        })?;
        loads.sent += 1;
        loads.pending = Some(PendingLoad {
            sequence: loads.sent,
            language: language.to_string(),
            done: done_tx,
            progress,
        });
        drop(loads);
        Ok(LoadTicket {
            language: language.to_string(),
            done: done_rx,
        })
    }

    /// Register `session_id` as the active session and return its channel.
    ///
    /// Events for any other session are dropped from now on.
    pub fn begin_session(&self, session_id: SessionId) -> WorkerSession {
        let (tx, rx) = mpsc::unbounded_channel();
        self.router
            .active_session
            .store(session_id, Ordering::Release);
        self.router.sessions.lock().insert(session_id, tx);
        WorkerSession {
            session_id,
            commands: self.commands.clone(),
            router: Arc::clone(&self.router),
            events: rx,
            released: false,
        }
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SaywordError::WorkerGone)
    }
}

impl Drop for WorkerHost {
    fn drop(&mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(thread) = self.thread.lock().take() {
            // Detach: the thread exits after draining Shutdown.
            drop(thread);
        }
    }
}

impl std::fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHost")
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// An in-flight load started by [`WorkerHost::begin_load`].
pub struct LoadTicket {
    language: String,
    done: oneshot::Receiver<std::result::Result<(), String>>,
}

impl LoadTicket {
    pub async fn wait(self) -> Result<()> {
        match self.done.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(SaywordError::ModelLoad(message)),
            Err(_) => Err(SaywordError::ModelLoad(format!(
                "load of '{}' was superseded",
                self.language
            ))),
        }
    }
}

/// One session's view of a worker. Dropping it unregisters the session and,
/// unless the recognizer was already released, sends `Stop`.
pub struct WorkerSession {
    session_id: SessionId,
    commands: Sender<WorkerCommand>,
    router: Arc<Router>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    released: bool,
}

impl WorkerSession {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn start(&self, vocabulary: Option<Vec<String>>, sample_rate: u32) -> Result<()> {
        self.send(WorkerCommand::Start {
            session_id: self.session_id,
            vocabulary,
            sample_rate,
        })
    }

    pub fn send_audio(&self, samples: Vec<f32>) -> Result<()> {
        self.send(WorkerCommand::Audio {
            session_id: self.session_id,
            samples,
        })
    }

    /// Finalize. Safe to call more than once.
    pub fn stop(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.send(WorkerCommand::Stop {
            session_id: self.session_id,
        })
    }

    pub fn transcribe(&mut self, samples: Vec<f32>, sample_rate: u32, language: &str) -> Result<()> {
        // One-shot jobs hold no recognizer, nothing to release.
        self.released = true;
        self.send(WorkerCommand::Transcribe {
            session_id: self.session_id,
            samples,
            sample_rate,
            language: language.to_string(),
        })
    }

    /// Next event for this session; `None` once the worker is gone.
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SaywordError::WorkerGone)
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        self.router.sessions.lock().remove(&self.session_id);
        if !self.released {
            let _ = self.commands.send(WorkerCommand::Stop {
                session_id: self.session_id,
            });
        }
    }
}

/// Loader for builds without an engine; every load fails with `reason`.
#[derive(Debug, Clone)]
pub struct UnavailableEngine {
    reason: String,
}

impl UnavailableEngine {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl GrammarModelLoader for UnavailableEngine {
    fn load(
        &self,
        _language: &str,
        _source: &ModelSource,
        _progress: ProgressFn<'_>,
    ) -> Result<Box<dyn GrammarModel>> {
        Err(SaywordError::ModelLoad(self.reason.clone()))
    }
}

impl TranscriberLoader for UnavailableEngine {
    fn load(&self, _source: &ModelSource, _progress: ProgressFn<'_>) -> Result<Box<dyn Transcriber>> {
        Err(SaywordError::ModelLoad(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_host() -> WorkerHost {
        WorkerHost::spawn("echo", |rx, sink| {
            while let Ok(cmd) = rx.recv() {
                match cmd {
                    WorkerCommand::Load { language, .. } => sink.emit(WorkerEvent::Ready { language }),
                    WorkerCommand::Start { session_id, .. } => {
                        sink.emit(WorkerEvent::Started { session_id })
                    }
                    WorkerCommand::Stop { session_id } => {
                        sink.emit(WorkerEvent::Stopped { session_id })
                    }
                    WorkerCommand::Shutdown => break,
                    _ => {}
                }
            }
        })
        .unwrap()
    }

    #[tokio::test]
    async fn load_resolves_on_ready() {
        let host = echo_host();
        host.load("en", ModelSource::default(), None).await.unwrap();
        assert!(host.is_alive());
    }

    #[tokio::test]
    async fn only_the_last_load_resolves() {
        let host = echo_host();
        let first = host.begin_load("en", ModelSource::default(), None).unwrap();
        let second = host.begin_load("es", ModelSource::default(), None).unwrap();
        let third = host.begin_load("en", ModelSource::default(), None).unwrap();

        assert!(first.wait().await.is_err());
        assert!(second.wait().await.is_err());
        third.wait().await.unwrap();
    }

    #[tokio::test]
    async fn stale_session_events_are_dropped() {
        let host = echo_host();
        let mut old = host.begin_session(1);
        let mut current = host.begin_session(2);

        old.start(None, 16_000).unwrap();
        current.start(None, 16_000).unwrap();

        assert_eq!(
            current.recv().await,
            Some(WorkerEvent::Started { session_id: 2 })
        );
        // The worker answered session 1 too, but it is no longer active.
        drop(current);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), old.recv())
                .await
                .is_err(),
            "stale session must not receive events"
        );
    }

    #[tokio::test]
    async fn worker_exit_fails_sessions_and_loads() {
        let host = WorkerHost::spawn("crashy", |rx, _sink| {
            // Exit on the first command.
            let _ = rx.recv();
        })
        .unwrap();
        let mut session = host.begin_session(5);
        session.start(None, 16_000).unwrap();

        match session.recv().await {
            Some(WorkerEvent::Error { session_id, .. }) => assert_eq!(session_id, Some(5)),
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(!host.is_alive());
        assert!(host.load("en", ModelSource::default(), None).await.is_err());
    }

    #[tokio::test]
    async fn unavailable_engine_fails_load() {
        let loader = UnavailableEngine::new("no engine");
        let mut progress = |_p: f32| {};
        assert!(GrammarModelLoader::load(&loader, "en", &ModelSource::default(), &mut progress).is_err());
    }
}
