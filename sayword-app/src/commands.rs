//! Command handlers. Each prints JSON lines to stdout.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use sayword_core::{
    audio::AudioSource, evaluate, EngineLoaders, InjectedSource, ListenRequest, MicrophoneSource,
    ModelKind, ModelManager, PreloadStatus, RecognitionEvent, SpeechEngine,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::playback::{CommandCuePlayer, CommandSpeaker};
use crate::settings::{default_settings_path, load_settings, normalize_language, AppSettings};
use crate::storage::SqliteCacheStore;
use crate::{Cli, Command, ListenArgs};

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::Match { target, heard } = &cli.command {
        return print(&evaluate(heard, target));
    }

    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    let store = Arc::new(
        SqliteCacheStore::new(SqliteCacheStore::default_db_path())
            .map_err(|e| anyhow::anyhow!("cache store: {e}"))?,
    );
    info!(
        settings = %settings_path.display(),
        language = settings.language.as_str(),
        "settings loaded"
    );

    match cli.command {
        Command::Listen(args) => {
            let engine = build_engine(&settings, &store, args.wav.as_deref())?;
            listen(&engine, &settings, args).await
        }
        Command::Preload { kind, language } => {
            let engine = build_engine(&settings, &store, None)?;
            let language = language.map_or_else(|| settings.language.clone(), |l| normalize_language(&l));
            preload(engine.models(), kind.into(), &language, true).await
        }
        Command::Speak { text, language } => {
            let engine = build_engine(&settings, &store, None)?;
            let language = language.map_or_else(|| settings.language.clone(), |l| normalize_language(&l));
            let text = text.join(" ");
            tokio::select! {
                outcome = engine.speak(&text, &language) => outcome.context("speech playback failed"),
                _ = tokio::signal::ctrl_c() => {
                    engine.stop_speaking();
                    Ok(())
                }
            }
        }
        Command::Status { reset_cache } => {
            if reset_cache {
                let cleared = store.clear().map_err(|e| anyhow::anyhow!("cache store: {e}"))?;
                info!(cleared, "cached-model flags cleared");
            }
            let cached = store
                .cached_models()
                .map_err(|e| anyhow::anyhow!("cache store: {e}"))?;
            print(&json!({
                "settingsPath": settings_path,
                "language": settings.language,
                "grammarLanguages": settings.models.grammar.keys().collect::<Vec<_>>(),
                "freeFormConfigured": settings.models.free_form.is_configured(),
                "cachedModels": cached,
                "engine": settings.engine,
            }))
        }
        Command::Match { .. } => Ok(()),
    }
}

fn build_engine(
    settings: &AppSettings,
    store: &Arc<SqliteCacheStore>,
    wav: Option<&Path>,
) -> anyhow::Result<Arc<SpeechEngine>> {
    let models = ModelManager::new(
        settings.models.clone(),
        EngineLoaders::compiled(&settings.models),
        Arc::clone(store) as _,
        settings.engine.progress_tick(),
    );

    let audio: Arc<dyn AudioSource> = match wav {
        Some(path) => Arc::new(
            InjectedSource::from_wav(path)
                .with_context(|| format!("cannot read {}", path.display()))?
                .paced(true)
                .with_trailing_silence(true),
        ),
        None => Arc::new(MicrophoneSource::new(settings.preferred_input_device.clone())),
    };

    Ok(SpeechEngine::builder(models)
        .config(settings.engine.clone())
        .audio_source(audio)
        .cues(Arc::new(CommandCuePlayer::new(
            settings.player_command.clone(),
            settings.start_cue.clone(),
            settings.stop_cue.clone(),
        )))
        .synthesizer(Arc::new(CommandSpeaker::new(settings.tts_command.clone())))
        .build())
}

async fn listen(engine: &Arc<SpeechEngine>, settings: &AppSettings, args: ListenArgs) -> anyhow::Result<()> {
    let language = args
        .language
        .as_deref()
        .map_or_else(|| settings.language.clone(), normalize_language);

    // A first run has nothing cached yet, so load the grammar model up front
    // rather than letting the session fall back.
    let vocabulary = args.vocabulary();
    if vocabulary.is_some() && settings.models.grammar_source(&language).is_configured() {
        preload(engine.models(), ModelKind::Grammar, &language, false).await?;
    }

    let mut request = ListenRequest::new(language).capture_audio(args.save_audio.is_some());
    if let Some(target) = args.target() {
        request = request.target(target);
    }
    if let Some(words) = vocabulary {
        request = request.vocabulary(words);
    }

    let mut stream = engine.listen(request);
    let mut stop_sent = false;
    loop {
        let event = tokio::select! {
            event = stream.next() => event,
            _ = tokio::signal::ctrl_c(), if !stop_sent => {
                info!("interrupted, finalizing");
                stream.stop();
                stop_sent = true;
                continue;
            }
        };
        let Some(event) = event else { break };
        if let RecognitionEvent::Result(result) = &event {
            if let (Some(path), Some(blob)) = (args.save_audio.as_ref(), result.audio_blob.as_ref()) {
                std::fs::write(path, blob).with_context(|| format!("cannot write {}", path.display()))?;
                info!(path = %path.display(), bytes = blob.len(), "audio saved");
            }
        }
        print(&event)?;
    }
    Ok(())
}

async fn preload(
    models: &Arc<ModelManager>,
    kind: ModelKind,
    language: &str,
    echo: bool,
) -> anyhow::Result<()> {
    let mut updates = models.preload(kind, language);
    while let Some(update) = updates.recv().await {
        if echo {
            print(&update)?;
        }
        match update.status {
            PreloadStatus::Loading => {}
            PreloadStatus::Done => {
                // Cached packages report done early; wait for the real load.
                if let Err(e) = models.wait_ready(kind, language).await {
                    warn!(language, "model load failed: {e}");
                }
                return Ok(());
            }
            PreloadStatus::Error => {
                warn!(language, detail = update.detail.as_deref().unwrap_or(""), "preload failed");
                return Ok(());
            }
        }
    }
    Ok(())
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
