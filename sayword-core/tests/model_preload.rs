mod common;

use std::time::Duration;

use common::{HarnessBuilder, ScriptedGrammar};
use sayword_core::models::{LoadState, ModelKind};
use sayword_core::{
    BackendKind, ListenRequest, ModelStatus, PreloadStatus, PreloadUpdate, RecognitionEvent,
};
use tokio::sync::mpsc;

async fn drain(mut rx: mpsc::UnboundedReceiver<PreloadUpdate>) -> Vec<PreloadUpdate> {
    let mut out = Vec::new();
    while let Some(update) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("preload stalled")
    {
        out.push(update);
    }
    out
}

#[tokio::test]
async fn concurrent_preloads_share_one_load() {
    let h = HarnessBuilder::new()
        .grammar(ScriptedGrammar::new().load_delay(Duration::from_millis(150)))
        .build();

    let first = h.models.preload(ModelKind::Grammar, "en");
    let second = h.models.preload(ModelKind::Grammar, "en");
    let (first, second) = tokio::join!(drain(first), drain(second));

    for updates in [&first, &second] {
        assert_eq!(updates.last().map(|u| u.status), Some(PreloadStatus::Done));
        let progress: Vec<f32> = updates
            .iter()
            .filter(|u| u.status == PreloadStatus::Loading)
            .filter_map(|u| u.progress)
            .collect();
        assert!(!progress.is_empty(), "simulated progress expected");
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert!(progress.iter().all(|p| *p <= 0.95));
    }
    assert_eq!(h.grammar.loads.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn back_to_back_language_switch_ends_on_the_last_language() {
    for _ in 0..10 {
        let h = HarnessBuilder::new()
            .grammar(ScriptedGrammar::new().load_delay(Duration::from_millis(5)))
            .build();
        let models = h.models.clone();

        let outcome = tokio::spawn(async move {
            let english = models.ensure_loading(ModelKind::Grammar, "en").unwrap();
            models.ensure_loading(ModelKind::Grammar, "es").unwrap();
            let ready = models.wait_ready(ModelKind::Grammar, "es").await;
            (english, ready)
        })
        .await
        .unwrap();

        let (mut english, ready) = outcome;
        ready.unwrap();
        // The superseded request settles as failed, never as ready.
        let settled = english
            .wait_for(|state| !matches!(state, LoadState::Pending { .. }))
            .await
            .map(|state| state.clone());
        assert!(matches!(settled, Ok(LoadState::Failed(_))));

        assert!(h.models.is_ready(ModelKind::Grammar, "es"));
        assert!(!h.models.is_ready(ModelKind::Grammar, "en"));
        assert_eq!(h.grammar.loads.lock().last().map(String::as_str), Some("es"));

        let stream = h
            .engine
            .listen(ListenRequest::new("es").target("dos").vocabulary(["uno", "dos"]));
        let events = common::collect_with_timeout(stream, Duration::from_secs(5)).await;
        match events.last() {
            Some(RecognitionEvent::Result(result)) => {
                assert_eq!(result.backend, BackendKind::Grammar);
                assert_eq!(result.transcript, "dos");
            }
            other => panic!("expected a grammar result, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn ready_model_reports_done_at_once() {
    let h = HarnessBuilder::new().build();
    h.models.wait_ready(ModelKind::Grammar, "en").await.unwrap();

    let mut rx = h.models.preload(ModelKind::Grammar, "en");
    assert_eq!(rx.try_recv().ok().map(|u| u.status), Some(PreloadStatus::Done));
    assert_eq!(h.grammar.loads.lock().len(), 1);
}

#[tokio::test]
async fn cached_model_is_done_before_it_is_loaded() {
    let h = HarnessBuilder::new()
        .grammar(ScriptedGrammar::new().load_delay(Duration::from_millis(200)))
        .cached(BackendKind::Grammar)
        .build();
    assert_eq!(h.models.snapshot(ModelKind::Grammar).status, ModelStatus::Cached);

    let mut rx = h.models.preload(ModelKind::Grammar, "en");
    assert_eq!(rx.try_recv().ok().map(|u| u.status), Some(PreloadStatus::Done));
    assert!(!h.models.is_ready(ModelKind::Grammar, "en"));

    // A listen arriving mid-load waits for it instead of falling back.
    let stream = h
        .engine
        .listen(ListenRequest::new("en").target("two").vocabulary(["one", "two"]));
    let events = common::collect_with_timeout(stream, Duration::from_secs(5)).await;
    match events.last() {
        Some(RecognitionEvent::Result(result)) => assert_eq!(result.backend, BackendKind::Grammar),
        other => panic!("expected a grammar result, got {other:?}"),
    }
    assert_eq!(h.grammar.loads.lock().len(), 1);
}

#[tokio::test]
async fn failed_preload_reports_error() {
    let h = HarnessBuilder::new()
        .grammar(ScriptedGrammar::new().failing_for("en"))
        .build();
    let mut status = h.models.subscribe();

    let updates = drain(h.models.preload(ModelKind::Grammar, "en")).await;
    let last = updates.last().expect("an update");
    assert_eq!(last.status, PreloadStatus::Error);
    assert!(last.detail.as_deref().unwrap_or("").contains("en"));
    assert_eq!(h.models.snapshot(ModelKind::Grammar).status, ModelStatus::Error);

    let mut seen = Vec::new();
    while let Ok(event) = status.try_recv() {
        seen.push(event.status);
    }
    assert_eq!(seen.first(), Some(&ModelStatus::Loading));
    assert_eq!(seen.last(), Some(&ModelStatus::Error));
}

#[tokio::test]
async fn free_form_model_is_shared_across_languages() {
    let h = HarnessBuilder::new()
        .transcriber(common::ScriptedTranscriber::saying("gato"))
        .build();

    h.models.wait_ready(ModelKind::FreeForm, "en").await.unwrap();
    assert!(h.models.is_ready(ModelKind::FreeForm, "es"));
    assert!(h.models.is_ready(ModelKind::FreeForm, "fr-FR"));
}
