//! End-to-end behaviour of the assembled pipeline against scripted engines.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;

use parley::inbound::IgnoreReason;
use parley::metrics::metric_names;
use parley::outbound::PassReason;
use parley::translate::Direction;
use parley::{
    ChatChannel, ChatEvent, DisplayMessage, EngineState, InboundOutcome, OutboundDecision, Pipeline,
    PipelineConfig, PipelineEvent, TranslateError, TranslationEngine,
};

enum Mode {
    Prefix,
    RateLimited,
    Fail,
    Slow(Duration),
    /// Delay chosen per input text.
    Delayed(fn(&str) -> Duration),
    /// Runs the callback, then answers like `Prefix`.
    Hook(Box<dyn Fn() + Send + Sync>),
}

struct ScriptedEngine {
    name: &'static str,
    mode: Mode,
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    fn new(name: &'static str, mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            name,
            mode,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranslationEngine for ScriptedEngine {
    fn name(&self) -> &str {
        self.name
    }

    async fn translate(&self, text: &str, _src: &str, tgt: &str) -> Result<String, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(text.to_string());
        match &self.mode {
            Mode::Prefix => Ok(format!("<{tgt}> {text}")),
            Mode::RateLimited => Err(TranslateError::RateLimited { retry_after_ms: 1000 }),
            Mode::Fail => Err(TranslateError::Api("upstream 502".into())),
            Mode::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(format!("<{tgt}> {text}"))
            }
            Mode::Delayed(delay_for) => {
                tokio::time::sleep(delay_for(text)).await;
                Ok(format!("<{tgt}> {text}"))
            }
            Mode::Hook(hook) => {
                hook();
                Ok(format!("<{tgt}> {text}"))
            }
        }
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        skip_detected_target_language: false,
        ..PipelineConfig::default()
    }
}

fn say(sender: &str, text: &str) -> ChatEvent {
    ChatEvent::inbound(ChatChannel::Say, sender, text)
}

async fn settled(pipeline: &Pipeline, id: &str) -> DisplayMessage {
    for _ in 0..300 {
        if let Some(message) = pipeline.history().get(id) {
            if !message.in_flight {
                return message;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("message {id} never settled");
}

fn translating_id(outcome: InboundOutcome) -> String {
    match outcome {
        InboundOutcome::Translating(id) => id,
        other => panic!("expected Translating, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn own_echo_is_reunited_without_engine_call() {
    let primary = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(config(), primary.clone(), None, Handle::current()).unwrap();

    let decision = pipeline.intercept_outbound_async("hello everyone").await;
    assert_eq!(
        decision,
        OutboundDecision::Translated {
            original: "hello everyone".into(),
            transmitted: "<ja> hello everyone".into(),
        }
    );

    let id = match pipeline.observe_inbound(&say("Minfilia Warde", "<ja> hello everyone")) {
        InboundOutcome::Echo(id) => id,
        other => panic!("expected echo, got {other:?}"),
    };
    let message = pipeline.history().get(&id).unwrap();
    assert_eq!(message.original_text, "hello everyone");
    assert_eq!(message.translated_text, "<ja> hello everyone");
    assert!(!message.in_flight);

    assert_eq!(primary.calls(), 1);
    assert_eq!(pipeline.cache().len(), 1);
    assert_eq!(pipeline.metrics().count(metric_names::DEDUP_HIT), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn excluded_text_is_sent_unchanged_and_never_cached() {
    let primary = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(config(), primary.clone(), None, Handle::current()).unwrap();

    for text in ["gg", " GG "] {
        let decision = pipeline.intercept_outbound_async(text).await;
        assert_eq!(
            decision,
            OutboundDecision::PassThrough {
                text: text.into(),
                reason: PassReason::Excluded,
            }
        );
    }
    let command = pipeline.intercept_outbound_async("/dance").await;
    assert_eq!(command.text(), "/dance");
    assert!(!command.is_translated());

    assert!(pipeline.cache().is_empty());
    assert_eq!(primary.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inbound_rate_limit_retries_on_secondary_and_fails_over() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("engine.json");
    let primary = ScriptedEngine::new("primary", Mode::RateLimited);
    let secondary = ScriptedEngine::new("secondary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(
        PipelineConfig {
            engine_state_path: Some(state_path.clone()),
            ..config()
        },
        primary.clone(),
        Some(secondary.clone() as Arc<dyn TranslationEngine>),
        Handle::current(),
    )
    .unwrap();
    let events = pipeline.subscribe();

    let id = translating_id(pipeline.observe_inbound(&say("Y'shtola Rhul@Ultros", "bonjour tout le monde")));
    let message = settled(&pipeline, &id).await;
    assert_eq!(message.translated_text, "<en> bonjour tout le monde");
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);
    assert_eq!(pipeline.engines().state(), EngineState::FailedOver);
    assert!(state_path.exists());

    let id = translating_id(pipeline.observe_inbound(&say("Y'shtola Rhul@Ultros", "merci beaucoup")));
    settled(&pipeline, &id).await;
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 2);
    assert_eq!(pipeline.engines().state(), EngineState::FailedOver);

    let failovers = events
        .try_iter()
        .filter(|e| matches!(e, PipelineEvent::FailedOver { .. }))
        .count();
    assert_eq!(failovers, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn outbound_rate_limit_sends_original_then_uses_secondary() {
    let primary = ScriptedEngine::new("primary", Mode::RateLimited);
    let secondary = ScriptedEngine::new("secondary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(
        config(),
        primary.clone(),
        Some(secondary.clone() as Arc<dyn TranslationEngine>),
        Handle::current(),
    )
    .unwrap();
    let mut state_rx = pipeline.engine_state();

    let first = pipeline.intercept_outbound_async("pull in five").await;
    assert_eq!(
        first,
        OutboundDecision::PassThrough {
            text: "pull in five".into(),
            reason: PassReason::RateLimited,
        }
    );
    assert_eq!(*state_rx.borrow_and_update(), EngineState::FailedOver);

    let second = pipeline.intercept_outbound_async("pull in five").await;
    assert_eq!(second.text(), "<ja> pull in five");
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn outbound_failure_reports_and_sends_original() {
    let primary = ScriptedEngine::new("primary", Mode::Fail);
    let pipeline = Pipeline::with_engines(config(), primary.clone(), None, Handle::current()).unwrap();
    let events = pipeline.subscribe();

    let decision = pipeline.intercept_outbound_async("where is the vendor").await;
    assert_eq!(decision.text(), "where is the vendor");
    assert!(matches!(
        decision,
        OutboundDecision::PassThrough {
            reason: PassReason::EngineFailure,
            ..
        }
    ));
    assert!(events.try_iter().any(|e| matches!(
        e,
        PipelineEvent::TranslationFailed {
            direction: Direction::OutboundIntercepted,
            ..
        }
    )));
    assert_eq!(pipeline.engines().state(), EngineState::PrimaryActive);
    assert!(pipeline.cache().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn long_translation_is_truncated_for_transport() {
    let primary = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(config(), primary, None, Handle::current()).unwrap();

    let original = "a".repeat(600);
    let decision = pipeline.intercept_outbound_async(&original).await;
    let OutboundDecision::Translated { transmitted, .. } = &decision else {
        panic!("expected translation, got {decision:?}");
    };
    assert!(transmitted.len() <= 500);
    assert!(transmitted.ends_with("..."));

    // The echo carries the truncated payload and still reunites.
    let outcome = pipeline.observe_inbound(&say("Minfilia Warde", transmitted));
    let id = outcome.message_id().unwrap().to_string();
    assert!(matches!(outcome, InboundOutcome::Echo(_)));
    assert_eq!(pipeline.history().get(&id).unwrap().original_text, original);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn glossary_terms_reach_the_engine_as_placeholders() {
    let primary = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(config(), primary.clone(), None, Handle::current()).unwrap();

    let decision = pipeline.intercept_outbound_async("need one more DPS").await;
    assert_eq!(decision.text(), "<ja> need one more DPS");
    let sent = primary.inputs.lock()[0].clone();
    assert!(!sent.contains("DPS"), "engine saw {sent}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_language_outbound_never_reaches_engine() {
    let primary = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(
        PipelineConfig {
            target_lang: "en".into(),
            ..config()
        },
        primary.clone(),
        None,
        Handle::current(),
    )
    .unwrap();

    let decision = pipeline.intercept_outbound_async("hello there").await;
    assert_eq!(
        decision,
        OutboundDecision::PassThrough {
            text: "hello there".into(),
            reason: PassReason::Unchanged,
        }
    );
    assert_eq!(primary.calls(), 0);
    assert!(pipeline.cache().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_intercept_works_inside_a_worker_thread() {
    let primary = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(config(), primary, None, Handle::current()).unwrap();
    let decision = pipeline.intercept_outbound("see you soon");
    assert_eq!(decision.text(), "<ja> see you soon");
}

#[test]
fn sync_intercept_gives_up_after_timeout() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let primary = ScriptedEngine::new("primary", Mode::Slow(Duration::from_secs(5)));
    let pipeline = Pipeline::with_engines(
        PipelineConfig {
            outbound_timeout_ms: 100,
            ..config()
        },
        primary,
        None,
        runtime.handle().clone(),
    )
    .unwrap();

    let started = std::time::Instant::now();
    let decision = pipeline.intercept_outbound("be right back");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        decision,
        OutboundDecision::PassThrough {
            text: "be right back".into(),
            reason: PassReason::TimedOut,
        }
    );
    assert_eq!(pipeline.metrics().count(metric_names::OUTBOUND_TIMEOUT), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inbound_failure_shows_original_text() {
    let primary = ScriptedEngine::new("primary", Mode::Fail);
    let pipeline = Pipeline::with_engines(config(), primary, None, Handle::current()).unwrap();
    let events = pipeline.subscribe();

    let id = translating_id(pipeline.observe_inbound(&say("Alisaie Leveilleur", "on y va")));
    let message = settled(&pipeline, &id).await;
    assert_eq!(message.translated_text, "on y va");
    assert!(events.try_iter().any(|e| matches!(
        e,
        PipelineEvent::TranslationFailed {
            direction: Direction::InboundObserved,
            ..
        }
    )));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inbound_rate_limit_without_secondary_shows_original() {
    let primary = ScriptedEngine::new("primary", Mode::RateLimited);
    let pipeline = Pipeline::with_engines(config(), primary.clone(), None, Handle::current()).unwrap();

    let id = translating_id(pipeline.observe_inbound(&say("Alisaie Leveilleur", "on y va")));
    let message = settled(&pipeline, &id).await;
    assert_eq!(message.translated_text, "on y va");
    assert_eq!(primary.calls(), 1);
    assert_eq!(pipeline.engines().state(), EngineState::PrimaryActive);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disabling_translation_cancels_in_flight_work() {
    let primary = ScriptedEngine::new("primary", Mode::Slow(Duration::from_secs(30)));
    let pipeline = Pipeline::with_engines(config(), primary, None, Handle::current()).unwrap();

    let id = translating_id(pipeline.observe_inbound(&say("Alisaie Leveilleur", "attendez-moi")));
    assert!(pipeline.history().get(&id).unwrap().in_flight);

    pipeline.set_translation_enabled(false);
    let message = settled(&pipeline, &id).await;
    assert_eq!(message.translated_text, "attendez-moi");

    assert_eq!(
        pipeline.observe_inbound(&say("Alisaie Leveilleur", "encore")),
        InboundOutcome::Ignored(IgnoreReason::Disabled)
    );
    let outbound = pipeline.intercept_outbound_async("wait for me").await;
    assert!(matches!(
        outbound,
        OutboundDecision::PassThrough {
            reason: PassReason::Disabled,
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_finalizes_in_flight_messages() {
    let primary = ScriptedEngine::new("primary", Mode::Slow(Duration::from_secs(30)));
    let pipeline = Pipeline::with_engines(config(), primary, None, Handle::current()).unwrap();

    let id = translating_id(pipeline.observe_inbound(&say("Alisaie Leveilleur", "à bientôt")));
    tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown())
        .await
        .unwrap();

    let message = pipeline.history().get(&id).unwrap();
    assert!(!message.in_flight);
    assert_eq!(message.translated_text, "à bientôt");
    assert_eq!(
        pipeline.observe_inbound(&say("Alisaie Leveilleur", "encore")),
        InboundOutcome::Ignored(IgnoreReason::ShutDown)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inbound_routing_rules() {
    let primary = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(config(), primary.clone(), None, Handle::current()).unwrap();

    let system = ChatEvent::inbound(ChatChannel::Other(56), "", "You obtain 3 gil.");
    assert_eq!(pipeline.observe_inbound(&system), InboundOutcome::Ignored(IgnoreReason::Channel));
    assert_eq!(
        pipeline.observe_inbound(&say("Tataru Taru", "   ")),
        InboundOutcome::Ignored(IgnoreReason::Blank)
    );
    assert_eq!(
        pipeline.observe_inbound(&say("Tataru Taru", "/wave")),
        InboundOutcome::Ignored(IgnoreReason::Command)
    );
    assert_eq!(
        pipeline.observe_inbound(&say("Goldsaucer Seller", "WTS gil! visit g u l d 2 v i p . c o m")),
        InboundOutcome::SpamDropped
    );
    assert!(pipeline.history().is_empty());

    let id = match pipeline.observe_inbound(&say("Tataru Taru", "gg")) {
        InboundOutcome::Excluded(id) => id,
        other => panic!("expected excluded, got {other:?}"),
    };
    let message = pipeline.history().get(&id).unwrap();
    assert_eq!(message.original_text, "gg");
    assert_eq!(message.translated_text, "gg");
    assert_eq!(primary.calls(), 0);
    assert_eq!(pipeline.metrics().count(metric_names::SPAM_DROPPED), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_inbound_lines_hit_the_cache() {
    let primary = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(config(), primary.clone(), None, Handle::current()).unwrap();

    let sender = format!("Thancred Waters{}Ultros", parley::sender::CROSS_REALM_GLYPH);
    let first = translating_id(pipeline.observe_inbound(&say(&sender, "guten Morgen")));
    let first = settled(&pipeline, &first).await;
    assert_eq!(first.sender, "Thancred Waters@Ultros");
    assert_eq!(first.translated_text, "<en> guten Morgen");

    let second = translating_id(pipeline.observe_inbound(&say(&sender, "guten Morgen")));
    let second = settled(&pipeline, &second).await;
    assert_eq!(second.translated_text, "<en> guten Morgen");
    assert_eq!(primary.calls(), 1);
    assert_eq!(pipeline.metrics().count(metric_names::CACHE_HIT), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lines_already_in_target_language_skip_the_engine() {
    let primary = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline =
        Pipeline::with_engines(PipelineConfig::default(), primary.clone(), None, Handle::current()).unwrap();

    let text = "The weather today is absolutely wonderful and I would love to go \
                outside for a long walk in the park with all of my friends.";
    let outcome = pipeline.observe_inbound(&say("Tataru Taru", text));
    assert!(matches!(outcome, InboundOutcome::AlreadyInTarget(_)));
    assert_eq!(primary.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn history_is_bounded_in_arrival_order() {
    let primary = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(
        PipelineConfig {
            history_max: 50,
            ..config()
        },
        primary,
        None,
        Handle::current(),
    )
    .unwrap();

    let ids: Vec<String> = (0..51)
        .map(|_| {
            pipeline
                .observe_inbound(&say("Tataru Taru", "gg"))
                .message_id()
                .unwrap()
                .to_string()
        })
        .collect();

    let kept: Vec<String> = pipeline.history().snapshot().into_iter().map(|m| m.id).collect();
    assert_eq!(kept.len(), 50);
    assert_eq!(kept, ids[1..].to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cache_and_history_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let persisted = || PipelineConfig {
        cache_path: Some(dir.path().join("cache.json")),
        history_path: Some(dir.path().join("history.db")),
        ..config()
    };

    let primary = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(persisted(), primary.clone(), None, Handle::current()).unwrap();
    let id = translating_id(pipeline.observe_inbound(&say("Tataru Taru", "bis morgen")));
    settled(&pipeline, &id).await;
    pipeline.shutdown().await;
    drop(pipeline);

    let restarted = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(persisted(), restarted.clone(), None, Handle::current()).unwrap();
    assert_eq!(pipeline.history().len(), 1);
    assert_eq!(pipeline.cache().len(), 1);

    let id = translating_id(pipeline.observe_inbound(&say("Tataru Taru", "bis morgen")));
    assert_eq!(settled(&pipeline, &id).await.translated_text, "<en> bis morgen");
    assert_eq!(restarted.calls(), 0);
}

fn slow_first(text: &str) -> Duration {
    if text.starts_with("first") {
        Duration::from_millis(400)
    } else {
        Duration::from_millis(10)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_translations_finish_out_of_order() {
    let primary = ScriptedEngine::new("primary", Mode::Delayed(slow_first));
    let pipeline = Pipeline::with_engines(config(), primary.clone(), None, Handle::current()).unwrap();

    let first = translating_id(pipeline.observe_inbound(&say("Urianger Augurelt", "first line, slowly")));
    let second = translating_id(pipeline.observe_inbound(&say("Krile Baldesion", "second line, quickly")));

    let quick = settled(&pipeline, &second).await;
    assert_eq!(quick.translated_text, "<en> second line, quickly");
    assert_eq!(quick.sender, "Krile Baldesion");
    assert!(pipeline.history().get(&first).unwrap().in_flight);

    let slow = settled(&pipeline, &first).await;
    assert_eq!(slow.translated_text, "<en> first line, slowly");
    assert_eq!(slow.original_text, "first line, slowly");
    assert_eq!(slow.sender, "Urianger Augurelt");

    let order: Vec<String> = pipeline.history().snapshot().into_iter().map(|m| m.id).collect();
    assert_eq!(order, vec![first, second]);
    assert_eq!(primary.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn result_landing_after_disable_shows_original() {
    let slot: Arc<OnceLock<Weak<Pipeline>>> = Arc::new(OnceLock::new());
    let hook_slot = Arc::clone(&slot);
    let primary = ScriptedEngine::new(
        "primary",
        Mode::Hook(Box::new(move || {
            if let Some(pipeline) = hook_slot.get().and_then(Weak::upgrade) {
                pipeline.set_translation_enabled(false);
            }
        })),
    );
    let pipeline = Arc::new(
        Pipeline::with_engines(config(), primary.clone(), None, Handle::current()).unwrap(),
    );
    slot.set(Arc::downgrade(&pipeline)).unwrap();

    let id = translating_id(pipeline.observe_inbound(&say("Alisaie Leveilleur", "on y va")));
    let message = settled(&pipeline, &id).await;
    assert_eq!(message.translated_text, "on y va");
    assert_eq!(primary.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn display_entries_keep_capture_time() {
    let primary = ScriptedEngine::new("primary", Mode::Prefix);
    let pipeline = Pipeline::with_engines(config(), primary.clone(), None, Handle::current()).unwrap();

    let mut excluded = say("Tataru Taru", "gg");
    excluded.timestamp_ms = 1_700_000_000_000;
    let id = pipeline.observe_inbound(&excluded).message_id().unwrap().to_string();
    assert_eq!(pipeline.history().get(&id).unwrap().timestamp_ms, 1_700_000_000_000);

    let mut translated = say("Tataru Taru", "danke schön");
    translated.timestamp_ms = 1_700_000_000_500;
    let id = translating_id(pipeline.observe_inbound(&translated));
    assert_eq!(settled(&pipeline, &id).await.timestamp_ms, 1_700_000_000_500);

    let mut outgoing = say("Tataru Taru", "hello there");
    outgoing.direction = Direction::OutboundIntercepted;
    assert_eq!(
        pipeline.observe_inbound(&outgoing),
        InboundOutcome::Ignored(IgnoreReason::NotInbound)
    );
    assert_eq!(primary.calls(), 1);
}
