//! Model lifecycle: which offline model is loaded, for which language, and
//! who is waiting for it.
//!
//! Each offline backend has one slot holding its worker and load state.
//! Only this manager moves a slot between states; adapters borrow the worker
//! once the slot is ready. A load is identified by a generation number, so
//! the outcome of a superseded load (e.g. after a language switch) can never
//! mark the newer request ready.

pub mod assets;
pub mod cache;

pub use assets::{ModelAssets, ModelSource};
pub use cache::{CacheStore, JsonCacheStore, MemoryCacheStore};

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SaywordError},
    ipc::events::{BackendKind, ModelStatus, ModelStatusEvent, PreloadUpdate},
    worker::{self, GrammarModelLoader, TranscriberLoader, UnavailableEngine, WorkerHost},
};

/// Language key of the free-form slot; its model serves every language.
const ANY_LANGUAGE: &str = "*";

/// Share of the remaining distance covered by each simulated progress tick.
const SIMULATED_STEP: f32 = 0.15;
/// Simulated progress never passes this before the load really finishes.
const SIMULATED_CEILING: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Grammar,
    FreeForm,
}

impl ModelKind {
    pub fn backend(self) -> BackendKind {
        match self {
            ModelKind::Grammar => BackendKind::Grammar,
            ModelKind::FreeForm => BackendKind::FreeForm,
        }
    }

    fn worker_name(self) -> &'static str {
        match self {
            ModelKind::Grammar => "grammar",
            ModelKind::FreeForm => "transcribe",
        }
    }

    fn language_key(self, language: &str) -> String {
        match self {
            ModelKind::Grammar => language.trim().to_lowercase(),
            ModelKind::FreeForm => ANY_LANGUAGE.to_string(),
        }
    }
}

/// State shared with everyone awaiting one load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Pending { progress: f32 },
    Ready,
    Failed(String),
}

/// The engines each worker runs.
#[derive(Clone)]
pub struct EngineLoaders {
    pub grammar: Arc<dyn GrammarModelLoader>,
    pub transcriber: Arc<dyn TranscriberLoader>,
}

impl EngineLoaders {
    /// The engines compiled into this build. Missing ones fail every load.
    #[cfg_attr(
        not(any(feature = "vosk", feature = "whisper")),
        allow(unused_variables)
    )]
    pub fn compiled(assets: &ModelAssets) -> Self {
        #[cfg(feature = "vosk")]
        let grammar: Arc<dyn GrammarModelLoader> =
            Arc::new(worker::vosk::VoskLoader::new(assets.cache_dir.clone()));
        #[cfg(not(feature = "vosk"))]
        let grammar: Arc<dyn GrammarModelLoader> =
            Arc::new(UnavailableEngine::new("built without the `vosk` feature"));

        #[cfg(feature = "whisper")]
        let transcriber: Arc<dyn TranscriberLoader> =
            Arc::new(worker::whisper::WhisperLoader::new(assets.cache_dir.clone()));
        #[cfg(not(feature = "whisper"))]
        let transcriber: Arc<dyn TranscriberLoader> =
            Arc::new(UnavailableEngine::new("built without the `whisper` feature"));

        Self {
            grammar,
            transcriber,
        }
    }
}

/// Point-in-time view of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSnapshot {
    pub kind: ModelKind,
    pub status: ModelStatus,
    pub language: Option<String>,
    pub cached: bool,
}

struct Slot {
    kind: ModelKind,
    worker: Option<Arc<WorkerHost>>,
    status: ModelStatus,
    language: Option<String>,
    generation: u64,
    pending: Option<watch::Receiver<LoadState>>,
    cached: bool,
}

impl Slot {
    fn new(kind: ModelKind, cached: bool) -> Self {
        Self {
            kind,
            worker: None,
            status: if cached {
                ModelStatus::Cached
            } else {
                ModelStatus::Unloaded
            },
            language: None,
            generation: 0,
            pending: None,
            cached,
        }
    }

    fn is_ready_for(&self, key: &str) -> bool {
        self.status == ModelStatus::Ready
            && self.language.as_deref() == Some(key)
            && self.worker.as_ref().is_some_and(|w| w.is_alive())
    }
}

pub struct ModelManager {
    assets: ModelAssets,
    loaders: EngineLoaders,
    store: Arc<dyn CacheStore>,
    progress_tick: Duration,
    grammar: Mutex<Slot>,
    free_form: Mutex<Slot>,
    status_tx: broadcast::Sender<ModelStatusEvent>,
}

impl ModelManager {
    /// Reads the persisted cached flags once.
    pub fn new(
        assets: ModelAssets,
        loaders: EngineLoaders,
        store: Arc<dyn CacheStore>,
        progress_tick: Duration,
    ) -> Arc<Self> {
        let read_flag = |kind: ModelKind| match store.is_cached(kind.backend()) {
            Ok(flag) => flag,
            Err(e) => {
                warn!(backend = kind.backend().as_str(), "cached flag unreadable: {e}");
                false
            }
        };
        let grammar = Slot::new(ModelKind::Grammar, read_flag(ModelKind::Grammar));
        let free_form = Slot::new(ModelKind::FreeForm, read_flag(ModelKind::FreeForm));
        let (status_tx, _) = broadcast::channel(64);

        Arc::new(Self {
            assets,
            loaders,
            store,
            progress_tick,
            grammar: Mutex::new(grammar),
            free_form: Mutex::new(free_form),
            status_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn snapshot(&self, kind: ModelKind) -> ModelSnapshot {
        let slot = self.slot(kind).lock();
        ModelSnapshot {
            kind,
            status: slot.status,
            language: slot.language.clone(),
            cached: slot.cached,
        }
    }

    pub fn is_ready(&self, kind: ModelKind, language: &str) -> bool {
        self.slot(kind)
            .lock()
            .is_ready_for(&kind.language_key(language))
    }

    /// Ready, already loading this language, or downloaded in an earlier
    /// run. Any of these is worth waiting for instead of falling back.
    pub fn is_available(&self, kind: ModelKind, language: &str) -> bool {
        let key = kind.language_key(language);
        let slot = self.slot(kind).lock();
        if slot.is_ready_for(&key) {
            return true;
        }
        let loading_this = slot.pending.is_some() && slot.language.as_deref() == Some(key.as_str());
        loading_this || slot.cached
    }

    /// The worker, only while its model is ready for `language`.
    pub fn worker(&self, kind: ModelKind, language: &str) -> Option<Arc<WorkerHost>> {
        let key = kind.language_key(language);
        let mut slot = self.slot(kind).lock();
        if slot.status != ModelStatus::Ready || slot.language.as_deref() != Some(key.as_str()) {
            return None;
        }
        let worker = slot.worker.as_ref().filter(|w| w.is_alive()).cloned();
        if worker.is_none() {
            warn!(backend = kind.backend().as_str(), "worker died while ready");
            slot.status = ModelStatus::Error;
            self.publish(&slot, Some("worker exited".into()));
        }
        worker
    }

    /// Load `language` unless it is ready or already in flight. Must be
    /// called inside a Tokio runtime.
    pub fn ensure_loading(
        self: &Arc<Self>,
        kind: ModelKind,
        language: &str,
    ) -> Result<watch::Receiver<LoadState>> {
        let key = kind.language_key(language);
        let mut slot = self.slot(kind).lock();

        if slot.is_ready_for(&key) {
            return Ok(watch::channel(LoadState::Ready).1);
        }
        if let Some(pending) = &slot.pending {
            if slot.language.as_deref() == Some(key.as_str()) {
                debug!(backend = kind.backend().as_str(), language = key.as_str(), "joining in-flight load");
                return Ok(pending.clone());
            }
        }

        let worker = match slot.worker.as_ref().filter(|w| w.is_alive()).cloned() {
            Some(worker) => worker,
            None => {
                let spawned = match self.spawn_worker(kind) {
                    Ok(worker) => Arc::new(worker),
                    Err(e) => {
                        slot.status = ModelStatus::Error;
                        self.publish(&slot, Some(e.to_string()));
                        return Err(e);
                    }
                };
                if slot.worker.is_some() {
                    info!(backend = kind.backend().as_str(), "respawned dead worker");
                }
                slot.worker = Some(Arc::clone(&spawned));
                spawned
            }
        };

        slot.generation += 1;
        let generation = slot.generation;
        if slot.language.is_some() && slot.language.as_deref() != Some(key.as_str()) {
            info!(
                backend = kind.backend().as_str(),
                from = slot.language.as_deref().unwrap_or(""),
                to = key.as_str(),
                "switching model language"
            );
        }
        slot.language = Some(key.clone());
        slot.status = ModelStatus::Loading;

        let source = match kind {
            ModelKind::Grammar => self.assets.grammar_source(&key),
            ModelKind::FreeForm => self.assets.free_form.clone(),
        };
        // Sent while the slot is locked, so the worker sees loads in the
        // same order as the generations.
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let ticket = match worker.begin_load(&key, source, Some(progress_tx)) {
            Ok(ticket) => ticket,
            Err(e) => {
                slot.status = ModelStatus::Error;
                slot.pending = None;
                self.publish(&slot, Some(e.to_string()));
                return Err(e);
            }
        };
        let (state_tx, state_rx) = watch::channel(LoadState::Pending { progress: 0.0 });
        slot.pending = Some(state_rx.clone());
        self.publish(&slot, None);
        drop(slot);

        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let load = ticket.wait();
            tokio::pin!(load);
            let outcome = loop {
                tokio::select! {
                    outcome = &mut load => break outcome,
                    Some(progress) = progress_rx.recv() => {
                        state_tx.send_replace(LoadState::Pending { progress });
                    }
                }
            };
            finish_load(&manager, kind, generation, outcome, &state_tx);
        });

        Ok(state_rx)
    }

    /// Resolve once `language` is loaded, starting the load if needed.
    pub async fn wait_ready(self: &Arc<Self>, kind: ModelKind, language: &str) -> Result<()> {
        let mut state = self.ensure_loading(kind, language)?;
        loop {
            let current = state.borrow_and_update().clone();
            match current {
                LoadState::Ready => return Ok(()),
                LoadState::Failed(message) => return Err(SaywordError::ModelLoad(message)),
                LoadState::Pending { .. } => {
                    if state.changed().await.is_err() {
                        return Err(SaywordError::ModelLoad("load was abandoned".into()));
                    }
                }
            }
        }
    }

    /// Preload with UI-friendly progress.
    ///
    /// Ready: `done` at once. Cached in an earlier run: `done` at once while
    /// the real load continues in the background. Otherwise: simulated
    /// progress (or the engine's own, when higher) until `done` or `error`.
    pub fn preload(
        self: &Arc<Self>,
        kind: ModelKind,
        language: &str,
    ) -> mpsc::UnboundedReceiver<PreloadUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();

        if self.is_ready(kind, language) {
            let _ = tx.send(PreloadUpdate::done());
            return rx;
        }
        let cached = self.slot(kind).lock().cached;
        let mut state = match self.ensure_loading(kind, language) {
            Ok(state) => state,
            Err(e) => {
                let _ = tx.send(PreloadUpdate::error(e.to_string()));
                return rx;
            }
        };
        if cached {
            debug!(backend = kind.backend().as_str(), "cached model, reporting done early");
            let _ = tx.send(PreloadUpdate::done());
            return rx;
        }

        let tick = self.progress_tick;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut simulated = 0.0f32;

            loop {
                let reported = match state.borrow_and_update().clone() {
                    LoadState::Ready => {
                        let _ = tx.send(PreloadUpdate::done());
                        return;
                    }
                    LoadState::Failed(message) => {
                        let _ = tx.send(PreloadUpdate::error(message));
                        return;
                    }
                    LoadState::Pending { progress } => progress,
                };

                tokio::select! {
                    changed = state.changed() => {
                        if changed.is_err() {
                            let _ = tx.send(PreloadUpdate::error("load was abandoned"));
                            return;
                        }
                    }
                    _ = interval.tick() => {
                        simulated += (SIMULATED_CEILING - simulated) * SIMULATED_STEP;
                        let shown = simulated.max(reported.min(SIMULATED_CEILING));
                        if tx.send(PreloadUpdate::loading(shown)).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        rx
    }

    fn slot(&self, kind: ModelKind) -> &Mutex<Slot> {
        match kind {
            ModelKind::Grammar => &self.grammar,
            ModelKind::FreeForm => &self.free_form,
        }
    }

    fn spawn_worker(&self, kind: ModelKind) -> Result<WorkerHost> {
        match kind {
            ModelKind::Grammar => {
                let loader = Arc::clone(&self.loaders.grammar);
                WorkerHost::spawn(kind.worker_name(), move |rx, sink| {
                    worker::grammar::run(loader.as_ref(), rx, sink)
                })
            }
            ModelKind::FreeForm => {
                let loader = Arc::clone(&self.loaders.transcriber);
                WorkerHost::spawn(kind.worker_name(), move |rx, sink| {
                    worker::transcribe::run(loader.as_ref(), rx, sink)
                })
            }
        }
    }

    fn publish(&self, slot: &Slot, detail: Option<String>) {
        let _ = self.status_tx.send(ModelStatusEvent {
            backend: slot.kind.backend(),
            language: slot.language.clone(),
            status: slot.status,
            detail,
        });
    }

    fn persist_cached(&self, slot: &mut Slot) {
        if slot.cached {
            return;
        }
        match self.store.mark_cached(slot.kind.backend()) {
            Ok(()) => slot.cached = true,
            Err(e) => warn!(backend = slot.kind.backend().as_str(), "failed to persist cached flag: {e}"),
        }
    }
}

fn finish_load(
    manager: &Weak<ModelManager>,
    kind: ModelKind,
    generation: u64,
    outcome: Result<()>,
    state_tx: &watch::Sender<LoadState>,
) {
    let Some(manager) = manager.upgrade() else {
        return;
    };
    let mut slot = manager.slot(kind).lock();

    if slot.generation != generation {
        debug!(backend = kind.backend().as_str(), generation, "superseded load finished");
        state_tx.send_replace(LoadState::Failed("load was superseded".into()));
        return;
    }

    slot.pending = None;
    match outcome {
        Ok(()) => {
            info!(
                backend = kind.backend().as_str(),
                language = slot.language.as_deref().unwrap_or(""),
                "model ready"
            );
            slot.status = ModelStatus::Ready;
            manager.persist_cached(&mut slot);
            manager.publish(&slot, None);
            state_tx.send_replace(LoadState::Ready);
        }
        Err(e) => {
            warn!(backend = kind.backend().as_str(), "model load failed: {e}");
            slot.status = ModelStatus::Error;
            let message = e.to_string();
            manager.publish(&slot, Some(message.clone()));
            state_tx.send_replace(LoadState::Failed(message));
        }
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("grammar", &self.snapshot(ModelKind::Grammar))
            .field("free_form", &self.snapshot(ModelKind::FreeForm))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ipc::events::PreloadStatus;
    use crate::worker::{
        Decode, GrammarModel, GrammarRecognizer, ProgressFn, Transcript,
    };

    struct Silent;

    impl GrammarRecognizer for Silent {
        fn accept(&mut self, _pcm: &[i16]) -> Result<Decode> {
            Ok(Decode::Running)
        }
        fn finish(&mut self) -> Transcript {
            Transcript::empty()
        }
    }

    struct SilentModel;

    impl GrammarModel for SilentModel {
        fn recognizer(
            &self,
            _vocabulary: Option<&[String]>,
            _sample_rate: u32,
        ) -> Result<Box<dyn GrammarRecognizer>> {
            Ok(Box::new(Silent))
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
        delay_ms: u64,
    }

    impl GrammarModelLoader for CountingLoader {
        fn load(
            &self,
            language: &str,
            _source: &ModelSource,
            progress: ProgressFn<'_>,
        ) -> Result<Box<dyn GrammarModel>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            progress(0.5);
            std::thread::sleep(Duration::from_millis(self.delay_ms));
            if language == "xx" {
                return Err(SaywordError::ModelLoad("no such package".into()));
            }
            Ok(Box::new(SilentModel))
        }
    }

    fn manager(loader: Arc<CountingLoader>, store: Arc<dyn CacheStore>) -> Arc<ModelManager> {
        ModelManager::new(
            ModelAssets::default(),
            EngineLoaders {
                grammar: loader,
                transcriber: Arc::new(UnavailableEngine::new("none")),
            },
            store,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn concurrent_waits_share_one_load() {
        let loader = Arc::new(CountingLoader {
            delay_ms: 50,
            ..Default::default()
        });
        let models = manager(Arc::clone(&loader), Arc::new(MemoryCacheStore::new()));

        let (a, b) = tokio::join!(
            models.wait_ready(ModelKind::Grammar, "en"),
            models.wait_ready(ModelKind::Grammar, "EN")
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(models.is_ready(ModelKind::Grammar, "en"));
        assert!(models.worker(ModelKind::Grammar, "en").is_some());
        assert!(models.worker(ModelKind::Grammar, "es").is_none());
    }

    #[tokio::test]
    async fn first_ready_persists_cached_flag() {
        let store = Arc::new(MemoryCacheStore::new());
        let models = manager(Arc::new(CountingLoader::default()), store.clone());
        assert_eq!(models.snapshot(ModelKind::Grammar).status, ModelStatus::Unloaded);

        models.wait_ready(ModelKind::Grammar, "en").await.unwrap();
        assert!(store.is_cached(BackendKind::Grammar).unwrap());
        assert!(models.snapshot(ModelKind::Grammar).cached);
    }

    #[tokio::test]
    async fn load_failure_sets_error_status() {
        let models = manager(
            Arc::new(CountingLoader::default()),
            Arc::new(MemoryCacheStore::new()),
        );
        let mut events = models.subscribe();

        assert!(models.wait_ready(ModelKind::Grammar, "xx").await.is_err());
        assert_eq!(models.snapshot(ModelKind::Grammar).status, ModelStatus::Error);
        assert!(models.worker(ModelKind::Grammar, "xx").is_none());

        assert_eq!(events.recv().await.unwrap().status, ModelStatus::Loading);
        assert_eq!(events.recv().await.unwrap().status, ModelStatus::Error);
    }

    #[tokio::test]
    async fn preload_simulates_progress_then_done() {
        let models = manager(
            Arc::new(CountingLoader {
                delay_ms: 80,
                ..Default::default()
            }),
            Arc::new(MemoryCacheStore::new()),
        );
        let mut updates = models.preload(ModelKind::Grammar, "en");

        let mut last = None;
        let mut loading = 0;
        while let Some(update) = updates.recv().await {
            if update.status == PreloadStatus::Loading {
                loading += 1;
                let p = update.progress.unwrap();
                assert!((0.0..=SIMULATED_CEILING).contains(&p));
            }
            last = Some(update);
        }
        assert!(loading > 0);
        assert_eq!(last.unwrap().status, PreloadStatus::Done);

        let mut again = models.preload(ModelKind::Grammar, "en");
        assert_eq!(again.recv().await.unwrap(), PreloadUpdate::done());
    }

    #[tokio::test]
    async fn cached_flag_reports_done_before_load_finishes() {
        let loader = Arc::new(CountingLoader {
            delay_ms: 100,
            ..Default::default()
        });
        let models = manager(
            Arc::clone(&loader),
            Arc::new(MemoryCacheStore::with_cached(&[BackendKind::Grammar])),
        );
        assert_eq!(models.snapshot(ModelKind::Grammar).status, ModelStatus::Cached);

        let mut updates = models.preload(ModelKind::Grammar, "en");
        assert_eq!(updates.recv().await.unwrap(), PreloadUpdate::done());
        assert!(!models.is_ready(ModelKind::Grammar, "en"));

        models.wait_ready(ModelKind::Grammar, "en").await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn free_form_ignores_language() {
        let models = manager(
            Arc::new(CountingLoader::default()),
            Arc::new(MemoryCacheStore::new()),
        );
        // No transcription engine compiled into this test manager.
        assert!(models.wait_ready(ModelKind::FreeForm, "en").await.is_err());
        assert_eq!(
            models.snapshot(ModelKind::FreeForm).language.as_deref(),
            Some(ANY_LANGUAGE)
        );
    }

    #[cfg(not(feature = "vosk"))]
    #[tokio::test]
    async fn builds_without_an_engine_fail_grammar_loads() {
        let models = ModelManager::new(
            ModelAssets::default(),
            EngineLoaders::compiled(&ModelAssets::default()),
            Arc::new(MemoryCacheStore::new()),
            Duration::from_millis(10),
        );
        let err = models
            .wait_ready(ModelKind::Grammar, "en")
            .await
            .expect_err("no grammar engine compiled in");
        assert!(err.to_string().contains("vosk"));
        assert_eq!(models.snapshot(ModelKind::Grammar).status, ModelStatus::Error);
    }
}
