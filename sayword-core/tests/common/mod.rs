#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sayword_core::audio::{ActiveCapture, AudioSource};
use sayword_core::buffering::AudioProducer;
use sayword_core::engine::BoxFuture;
use sayword_core::models::MemoryCacheStore;
use sayword_core::worker::{
    Decode, GrammarModel, GrammarModelLoader, GrammarRecognizer, ProgressFn, Transcriber,
    TranscriberLoader, Transcript,
};
use sayword_core::{
    Alternative, BackendKind, Cue, CuePlayer, EngineConfig, EngineLoaders, InjectedSource,
    ModelAssets, ModelManager, ModelSource, NativeEvent, NativeOptions, NativeRecognizer,
    NativeStartError, RecognitionEvent, SaywordError, SpeechEngine, SpeechSynthesizer,
};
use tokio::sync::broadcast;

/// A 440 Hz tone followed by digital silence.
pub fn tone_then_silence(sample_rate: u32, tone_ms: u64, silence_ms: u64) -> Vec<f32> {
    let tone = (sample_rate as u64 * tone_ms / 1000) as usize;
    let silence = (sample_rate as u64 * silence_ms / 1000) as usize;
    (0..tone)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin())
        .chain(std::iter::repeat(0.0).take(silence))
        .collect()
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        max_listen_ms: 2_000,
        stop_grace_ms: 100,
        transcribe_timeout_ms: 2_000,
        progress_tick_ms: 10,
        ..EngineConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Grammar engine fake
// ---------------------------------------------------------------------------

/// Hears its language's word whenever a frame carries any energy.
#[derive(Default)]
pub struct ScriptedGrammar {
    words: HashMap<String, String>,
    failing: Vec<String>,
    load_delay: Duration,
    pub loads: Mutex<Vec<String>>,
    pub vocabularies: Arc<Mutex<Vec<Option<Vec<String>>>>>,
    pub created: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl ScriptedGrammar {
    pub fn new() -> Self {
        Self::default()
            .hears("en", "two")
            .hears("es", "dos")
    }

    pub fn hears(mut self, language: &str, word: &str) -> Self {
        self.words.insert(language.to_string(), word.to_string());
        self
    }

    pub fn failing_for(mut self, language: &str) -> Self {
        self.failing.push(language.to_string());
        self
    }

    pub fn load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn live_recognizers(&self) -> usize {
        self.created.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }
}

impl GrammarModelLoader for ScriptedGrammar {
    fn load(
        &self,
        language: &str,
        _source: &ModelSource,
        progress: ProgressFn<'_>,
    ) -> sayword_core::Result<Box<dyn GrammarModel>> {
        self.loads.lock().push(language.to_string());
        progress(0.5);
        thread::sleep(self.load_delay);
        if self.failing.iter().any(|l| l == language) {
            return Err(SaywordError::ModelLoad(format!("no model for {language}")));
        }
        Ok(Box::new(ScriptedGrammarModel {
            word: self.words.get(language).cloned().unwrap_or_default(),
            vocabularies: Arc::clone(&self.vocabularies),
            created: Arc::clone(&self.created),
            released: Arc::clone(&self.released),
        }))
    }
}

struct ScriptedGrammarModel {
    word: String,
    vocabularies: Arc<Mutex<Vec<Option<Vec<String>>>>>,
    created: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl GrammarModel for ScriptedGrammarModel {
    fn recognizer(
        &self,
        vocabulary: Option<&[String]>,
        _sample_rate: u32,
    ) -> sayword_core::Result<Box<dyn GrammarRecognizer>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.vocabularies.lock().push(vocabulary.map(<[String]>::to_vec));
        Ok(Box::new(ScriptedRecognizer {
            word: self.word.clone(),
            heard: false,
            released: Arc::clone(&self.released),
        }))
    }
}

struct ScriptedRecognizer {
    word: String,
    heard: bool,
    released: Arc<AtomicUsize>,
}

impl GrammarRecognizer for ScriptedRecognizer {
    fn accept(&mut self, pcm: &[i16]) -> sayword_core::Result<Decode> {
        if !self.heard && pcm.iter().any(|s| s.unsigned_abs() > 3_000) {
            self.heard = true;
            return Ok(Decode::Partial(self.word.clone()));
        }
        Ok(Decode::Running)
    }

    fn finish(&mut self) -> Transcript {
        if self.heard {
            Transcript {
                text: self.word.clone(),
                alternatives: vec![Alternative::new(self.word.clone(), Some(0.9))],
                confidence: Some(0.9),
            }
        } else {
            Transcript::empty()
        }
    }
}

impl Drop for ScriptedRecognizer {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Transcription engine fake
// ---------------------------------------------------------------------------

pub struct ScriptedTranscriber {
    text: String,
    available: bool,
    pub jobs: Arc<Mutex<Vec<(usize, String)>>>,
}

impl ScriptedTranscriber {
    pub fn saying(text: &str) -> Self {
        Self {
            text: text.to_string(),
            available: true,
            jobs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::saying("")
        }
    }
}

impl TranscriberLoader for ScriptedTranscriber {
    fn load(
        &self,
        _source: &ModelSource,
        progress: ProgressFn<'_>,
    ) -> sayword_core::Result<Box<dyn Transcriber>> {
        if !self.available {
            return Err(SaywordError::ModelLoad("no transcription model".into()));
        }
        progress(1.0);
        Ok(Box::new(FixedTranscriber {
            text: self.text.clone(),
            jobs: Arc::clone(&self.jobs),
        }))
    }
}

struct FixedTranscriber {
    text: String,
    jobs: Arc<Mutex<Vec<(usize, String)>>>,
}

impl Transcriber for FixedTranscriber {
    fn transcribe(&mut self, samples: &[f32], language: &str) -> sayword_core::Result<Transcript> {
        self.jobs.lock().push((samples.len(), language.to_string()));
        Ok(Transcript::new(self.text.clone()))
    }
}

// ---------------------------------------------------------------------------
// Native recognizer fake
// ---------------------------------------------------------------------------

pub struct ScriptedNative {
    tx: broadcast::Sender<NativeEvent>,
    script: Vec<(u64, NativeEvent)>,
    supported: bool,
    already_started: bool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub options: Mutex<Option<NativeOptions>>,
}

impl ScriptedNative {
    /// Each entry is sent after sleeping its delay in milliseconds.
    pub fn new(script: Vec<(u64, NativeEvent)>) -> Self {
        let (tx, _) = broadcast::channel(32);
        Self {
            tx,
            script,
            supported: true,
            already_started: false,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            options: Mutex::new(None),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new(Vec::new())
        }
    }

    pub fn already_started(mut self) -> Self {
        self.already_started = true;
        self
    }
}

pub fn interim(texts: &[&str]) -> NativeEvent {
    NativeEvent::Result {
        alternatives: texts.iter().map(|t| Alternative::new(*t, None)).collect(),
        is_final: false,
    }
}

pub fn final_result(texts: &[&str]) -> NativeEvent {
    NativeEvent::Result {
        alternatives: texts.iter().map(|t| Alternative::new(*t, None)).collect(),
        is_final: true,
    }
}

impl NativeRecognizer for ScriptedNative {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn subscribe(&self) -> broadcast::Receiver<NativeEvent> {
        self.tx.subscribe()
    }

    fn start(&self, options: &NativeOptions) -> Result<(), NativeStartError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.options.lock() = Some(options.clone());
        let tx = self.tx.clone();
        let script = self.script.clone();
        thread::spawn(move || {
            for (delay, event) in script {
                thread::sleep(Duration::from_millis(delay));
                let _ = tx.send(event);
            }
        });
        if self.already_started {
            return Err(NativeStartError::AlreadyStarted);
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(NativeEvent::Ended);
    }
}

// ---------------------------------------------------------------------------
// Audio and playback observers
// ---------------------------------------------------------------------------

/// Wraps an [`InjectedSource`] and records when captures open and close.
pub struct ObservedSource {
    inner: InjectedSource,
    pub opened: Arc<Mutex<Vec<Instant>>>,
    pub closed: Arc<AtomicUsize>,
}

impl ObservedSource {
    pub fn new(inner: InjectedSource) -> Self {
        Self {
            inner,
            opened: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }
}

impl AudioSource for ObservedSource {
    fn describe(&self) -> String {
        format!("observed {}", self.inner.describe())
    }

    fn open(
        &self,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        frame_hint: usize,
    ) -> sayword_core::Result<Box<dyn ActiveCapture>> {
        self.opened.lock().push(Instant::now());
        let inner = self.inner.open(producer, running, frame_hint)?;
        Ok(Box::new(ObservedCapture {
            inner,
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct ObservedCapture {
    inner: Box<dyn ActiveCapture>,
    closed: Arc<AtomicUsize>,
}

impl ActiveCapture for ObservedCapture {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn pump(&mut self) -> bool {
        self.inner.pump()
    }

    fn shutdown(&mut self) {
        self.inner.shutdown();
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records `(cue, started, finished)` for every cue.
pub struct RecordingCues {
    duration: Duration,
    pub played: Arc<Mutex<Vec<(Cue, Instant, Instant)>>>,
}

impl RecordingCues {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            played: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl CuePlayer for RecordingCues {
    fn play(&self, cue: Cue) -> BoxFuture<'_, sayword_core::Result<()>> {
        Box::pin(async move {
            let started = Instant::now();
            tokio::time::sleep(self.duration).await;
            self.played.lock().push((cue, started, Instant::now()));
            Ok(())
        })
    }
}

/// Speaks for a fixed time; counts how often playback ran to the end.
pub struct SlowSynthesizer {
    duration: Duration,
    pub completed: AtomicUsize,
}

impl SlowSynthesizer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            completed: AtomicUsize::new(0),
        }
    }
}

impl SpeechSynthesizer for SlowSynthesizer {
    fn speak<'a>(&'a self, _text: &'a str, _language: &'a str) -> BoxFuture<'a, sayword_core::Result<()>> {
        Box::pin(async move {
            tokio::time::sleep(self.duration).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: Arc<SpeechEngine>,
    pub models: Arc<ModelManager>,
    pub grammar: Arc<ScriptedGrammar>,
    pub transcriber: Arc<ScriptedTranscriber>,
}

pub struct HarnessBuilder {
    grammar: ScriptedGrammar,
    transcriber: ScriptedTranscriber,
    cached: Vec<BackendKind>,
    audio: Arc<dyn AudioSource>,
    native: Option<Arc<ScriptedNative>>,
    cues: Option<Arc<dyn CuePlayer>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    config: EngineConfig,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            grammar: ScriptedGrammar::new(),
            transcriber: ScriptedTranscriber::unavailable(),
            cached: Vec::new(),
            audio: Arc::new(InjectedSource::new(tone_then_silence(16_000, 300, 200), 16_000)),
            native: None,
            cues: None,
            synthesizer: None,
            config: test_config(),
        }
    }

    pub fn grammar(mut self, grammar: ScriptedGrammar) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn transcriber(mut self, transcriber: ScriptedTranscriber) -> Self {
        self.transcriber = transcriber;
        self
    }

    pub fn cached(mut self, backend: BackendKind) -> Self {
        self.cached.push(backend);
        self
    }

    pub fn audio(mut self, audio: Arc<dyn AudioSource>) -> Self {
        self.audio = audio;
        self
    }

    pub fn native(mut self, native: Arc<ScriptedNative>) -> Self {
        self.native = Some(native);
        self
    }

    pub fn cues(mut self, cues: Arc<dyn CuePlayer>) -> Self {
        self.cues = Some(cues);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Harness {
        let grammar = Arc::new(self.grammar);
        let transcriber = Arc::new(self.transcriber);
        let loaders = EngineLoaders {
            grammar: Arc::clone(&grammar) as _,
            transcriber: Arc::clone(&transcriber) as _,
        };
        let models = ModelManager::new(
            ModelAssets::default(),
            loaders,
            Arc::new(MemoryCacheStore::with_cached(&self.cached)),
            Duration::from_millis(10),
        );

        let mut builder = SpeechEngine::builder(Arc::clone(&models))
            .config(self.config)
            .audio_source(self.audio);
        if let Some(native) = self.native {
            builder = builder.native(native);
        }
        if let Some(cues) = self.cues {
            builder = builder.cues(cues);
        }
        if let Some(synthesizer) = self.synthesizer {
            builder = builder.synthesizer(synthesizer);
        }

        Harness {
            engine: builder.build(),
            models,
            grammar,
            transcriber,
        }
    }
}

pub async fn collect_with_timeout(
    stream: sayword_core::RecognitionStream,
    limit: Duration,
) -> Vec<RecognitionEvent> {
    tokio::time::timeout(limit, stream.collect())
        .await
        .expect("session did not finish in time")
}

/// Poll `condition` every 10 ms until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
