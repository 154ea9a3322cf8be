//! End-to-end tests: submission over the bus, dual-queue admission, worker
//! pipeline, tier cascade, and the result cache, driven by scripted engine
//! doubles.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use babelgate::config::EngineConfig;
use babelgate::engine::{EngineError, EngineReply, EngineRequest, LoadState, TranslationEngine};
use babelgate::error::ErrorCode;
use babelgate::task::{ConversationClass, TranslationEvent, TranslationTask};
use babelgate::{DispatchEngine, TierName};

/// Engine double: tags the text with the target language and the tier that
/// produced it.
#[derive(Default)]
struct TaggingEngine;

#[async_trait]
impl TranslationEngine for TaggingEngine {
    async fn translate(
        &mut self,
        request: EngineRequest,
        _cancel: &CancellationToken,
    ) -> Result<EngineReply, EngineError> {
        Ok(EngineReply {
            text: format!("[{}] {}", request.target_lang, request.text),
            confidence: 0.9,
        })
    }
}

/// Engine double that echoes its input unchanged.
#[derive(Default)]
struct EchoEngine;

#[async_trait]
impl TranslationEngine for EchoEngine {
    async fn translate(
        &mut self,
        request: EngineRequest,
        _cancel: &CancellationToken,
    ) -> Result<EngineReply, EngineError> {
        Ok(EngineReply {
            text: request.text,
            confidence: 1.0,
        })
    }
}

/// Engine double that refuses texts containing a marker.
#[derive(Default)]
struct FlakyEngine;

#[async_trait]
impl TranslationEngine for FlakyEngine {
    async fn translate(
        &mut self,
        request: EngineRequest,
        _cancel: &CancellationToken,
    ) -> Result<EngineReply, EngineError> {
        if request.text.contains("FAIL") {
            Err(EngineError::Http {
                status: 400,
                body: "refused".into(),
            })
        } else {
            Ok(EngineReply {
                text: format!("ok: {}", request.text),
                confidence: 0.8,
            })
        }
    }
}

fn handles<E: TranslationEngine + Default + 'static>(n: usize) -> Vec<Box<dyn TranslationEngine>> {
    (0..n)
        .map(|_| Box::new(E::default()) as Box<dyn TranslationEngine>)
        .collect()
}

fn engine_with<E: TranslationEngine + Default + 'static>(loaded: &[TierName]) -> DispatchEngine {
    let engine = DispatchEngine::new(EngineConfig::default(), handles::<E>(4))
        .expect("engine construction");
    for &tier in loaded {
        engine.registry().mark(tier, LoadState::Ready);
    }
    engine
}

fn task(id: &str, text: &str, targets: &[&str], tier: TierName) -> TranslationTask {
    TranslationTask {
        task_id: id.to_string(),
        message_id: uuid::Uuid::new_v4().to_string(),
        text: text.to_string(),
        source_language: "en".into(),
        target_languages: targets.iter().map(|s| s.to_string()).collect(),
        conversation_class: ConversationClass::Standard,
        requested_tier: tier,
    }
}

async fn next_event(rx: &mut broadcast::Receiver<TranslationEvent>) -> TranslationEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within deadline")
        .expect("stream open")
}

#[tokio::test]
async fn scenario_a_fresh_translation() {
    let engine = engine_with::<TaggingEngine>(&[TierName::Basic]);
    engine.start();
    let mut events = engine.subscribe();

    engine.submit(task("a-1", "Hello world", &["fr"], TierName::Basic));

    match next_event(&mut events).await {
        TranslationEvent::Result(r) => {
            assert_eq!(r.task_id, "a-1");
            assert_eq!(r.target_language, "fr");
            assert!(!r.translated_text.is_empty());
            assert_ne!(r.translated_text, "Hello world");
            assert_eq!(r.tier_used, "basic");
            assert!(!r.from_cache);
            assert!(r.confidence > 0.0);
        }
        other => panic!("expected result, got {other:?}"),
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn scenario_b_repeat_request_hits_cache() {
    let engine = engine_with::<TaggingEngine>(&[TierName::Basic]);
    engine.start();
    let mut events = engine.subscribe();

    engine.submit(task("b-1", "Hello world", &["fr"], TierName::Basic));
    let first = match next_event(&mut events).await {
        TranslationEvent::Result(r) => r,
        other => panic!("expected result, got {other:?}"),
    };
    assert!(!first.from_cache);

    engine.submit(task("b-2", "Hello world", &["fr"], TierName::Basic));
    let second = match next_event(&mut events).await {
        TranslationEvent::Result(r) => r,
        other => panic!("expected result, got {other:?}"),
    };
    assert!(second.from_cache);
    assert_eq!(second.translated_text, first.translated_text);
    assert!(second.processing_time_ms < 100);

    engine.shutdown().await;
}

#[tokio::test]
async fn scenario_c_structure_survives_identity_translation() {
    let engine = engine_with::<EchoEngine>(&[TierName::Basic]);
    engine.start();
    let mut events = engine.subscribe();

    let text = "🎉 Title\n\nBody line 🚀";
    engine.submit(task("c-1", text, &["fr"], TierName::Basic));

    match next_event(&mut events).await {
        TranslationEvent::Result(r) => assert_eq!(r.translated_text, text),
        other => panic!("expected result, got {other:?}"),
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn scenario_d_admission_bound_is_exact() {
    // Workers intentionally not started: admission is the system under test.
    let engine = engine_with::<TaggingEngine>(&[TierName::Basic]);
    let mut events = engine.subscribe();

    for i in 0..10_001 {
        engine.submit(task(&format!("d-{i}"), "hello", &["fr"], TierName::Basic));
    }

    let mut rejections = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            TranslationEvent::Error(e) => {
                assert_eq!(e.code, ErrorCode::ResourceExhausted);
                rejections += 1;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(rejections, 1);
    assert_eq!(engine.stats().queue_depths.standard, 10_000);
}

#[tokio::test]
async fn fallback_cascade_serves_basic_for_premium_request() {
    let engine = engine_with::<TaggingEngine>(&[TierName::Basic]);
    engine.start();
    let mut events = engine.subscribe();

    engine.submit(task("f-1", "Hello world", &["de"], TierName::Premium));

    match next_event(&mut events).await {
        TranslationEvent::Result(r) => {
            assert_eq!(r.tier_used, "basic");
            assert!(!r.from_cache);
        }
        other => panic!("expected result, got {other:?}"),
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn no_loaded_tier_reports_unavailable() {
    let engine = engine_with::<TaggingEngine>(&[]);
    engine.start();
    let mut events = engine.subscribe();

    engine.submit(task("u-1", "Hello world", &["fr"], TierName::Medium));

    match next_event(&mut events).await {
        TranslationEvent::Error(e) => {
            assert_eq!(e.code, ErrorCode::Unavailable);
            assert_eq!(e.target_language.as_deref(), Some("fr"));
        }
        other => panic!("expected error, got {other:?}"),
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn worker_survives_engine_failures() {
    let engine = engine_with::<FlakyEngine>(&[TierName::Basic]);
    engine.start();
    let mut events = engine.subscribe();

    engine.submit(task("w-1", "please FAIL this one", &["fr"], TierName::Basic));
    match next_event(&mut events).await {
        TranslationEvent::Error(e) => {
            assert_eq!(e.task_id, "w-1");
            assert_eq!(e.code, ErrorCode::Internal);
        }
        other => panic!("expected error, got {other:?}"),
    }

    // The pool is still alive and serving.
    engine.submit(task("w-2", "but translate this", &["fr"], TierName::Basic));
    match next_event(&mut events).await {
        TranslationEvent::Result(r) => {
            assert_eq!(r.task_id, "w-2");
            assert!(r.translated_text.starts_with("ok:"));
        }
        other => panic!("expected result, got {other:?}"),
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn source_language_targets_are_echoed() {
    let engine = engine_with::<TaggingEngine>(&[TierName::Basic]);
    engine.start();
    let mut events = engine.subscribe();

    engine.submit(task("e-1", "Hello world", &["en", "fr"], TierName::Basic));

    let mut echo_seen = false;
    let mut translated_seen = false;
    for _ in 0..2 {
        match next_event(&mut events).await {
            TranslationEvent::Result(r) if r.target_language == "en" => {
                assert_eq!(r.translated_text, "Hello world");
                assert_eq!(r.tier_used, "none");
                echo_seen = true;
            }
            TranslationEvent::Result(r) if r.target_language == "fr" => {
                assert_ne!(r.translated_text, "Hello world");
                translated_seen = true;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(echo_seen && translated_seen);

    engine.shutdown().await;
}

#[tokio::test]
async fn broadcast_class_is_served_by_its_own_pool() {
    let engine = engine_with::<TaggingEngine>(&[TierName::Basic]);
    engine.start();
    let mut events = engine.subscribe();

    let mut broadcast_task = task("bc-1", "Hello everyone", &["fr"], TierName::Basic);
    broadcast_task.conversation_class = ConversationClass::Broadcast;
    engine.submit(broadcast_task);

    match next_event(&mut events).await {
        TranslationEvent::Result(r) => assert_eq!(r.task_id, "bc-1"),
        other => panic!("expected result, got {other:?}"),
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn stats_and_readiness_reflect_engine_state() {
    let engine = engine_with::<TaggingEngine>(&[]);
    assert!(!engine.is_ready());

    engine.start();
    assert!(!engine.is_ready(), "no tier loaded yet");

    engine.registry().mark(TierName::Medium, LoadState::Ready);
    assert!(engine.is_ready());

    let mut events = engine.subscribe();
    engine.submit(task("s-1", "Hello world", &["fr"], TierName::Medium));
    match next_event(&mut events).await {
        TranslationEvent::Result(_) => {}
        other => panic!("expected result, got {other:?}"),
    }

    let stats = engine.stats();
    assert_eq!(stats.translations_processed, 1);
    assert_eq!(stats.tiers_loaded, vec![TierName::Medium]);
    assert_eq!(stats.queue_depths.standard, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn tier_loading_applies_bounded_retry() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    let engine = engine_with::<TaggingEngine>(&[]);
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts2 = Arc::clone(&attempts);

    engine
        .load_tiers(move |config| {
            let attempts = Arc::clone(&attempts2);
            async move {
                if config.name == TierName::Premium {
                    // Premium never comes up.
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::Http {
                        status: 404,
                        body: "missing model".into(),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1, "non-timeout fails fast");
    assert_eq!(engine.registry().state(TierName::Premium), LoadState::Failed);
    assert!(engine.registry().is_loaded(TierName::Basic));
    assert!(engine.registry().is_loaded(TierName::Medium));
}
