//! Pipeline assembly: builds every component from a [`PipelineConfig`] and
//! exposes the host-facing entry points.

use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cancellation::InflightWork;
use crate::chat::ChatEvent;
use crate::config::{PipelineConfig, RuntimeSwitches};
use crate::dedup::PendingOutgoing;
use crate::events::{EventBus, PipelineEvent};
use crate::failover::{EngineRegistry, EngineState};
use crate::filter::SpamFilter;
use crate::history::{HistoryError, HistoryStore};
use crate::inbound::{IgnoreReason, InboundOutcome, InboundProcessor};
use crate::metrics::MetricsRegistry;
use crate::outbound::{OutboundDecision, OutboundInterceptor};
use crate::sender::LocalIdentity;
use crate::translate::cache::TranslationCache;
use crate::translate::glossary::GlossaryProtector;
use crate::translate::service::TranslationService;
use crate::translate::{build_engine, TranslateError, TranslationEngine};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no primary translation engine configured")]
    NoPrimaryEngine,
    #[error("engine setup failed: {0}")]
    Engine(#[from] TranslateError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error("spam filter pattern invalid: {0}")]
    Filter(#[from] regex::Error),
}

pub struct Pipeline {
    switches: Arc<RuntimeSwitches>,
    outbound: OutboundInterceptor,
    inbound: Arc<InboundProcessor>,
    engines: Arc<EngineRegistry>,
    cache: Arc<TranslationCache>,
    history: Arc<HistoryStore>,
    inflight: Arc<InflightWork>,
    events: Arc<EventBus>,
    metrics: Arc<MetricsRegistry>,
}

impl Pipeline {
    /// Build engines from configuration, then assemble. A secondary engine
    /// that fails to build is logged and left out.
    pub fn new(config: PipelineConfig, runtime: Handle) -> Result<Self, PipelineError> {
        let primary_config = config
            .primary_engine
            .as_ref()
            .ok_or(PipelineError::NoPrimaryEngine)?;
        let primary = build_engine(primary_config)?;
        let secondary = match config.secondary_engine.as_ref().map(build_engine) {
            Some(Ok(engine)) => Some(engine),
            Some(Err(e)) => {
                warn!(error = %e, "secondary engine unavailable, failover disabled");
                None
            }
            None => None,
        };
        Self::with_engines(config, primary, secondary, runtime)
    }

    /// Assemble around caller-supplied engines.
    pub fn with_engines(
        config: PipelineConfig,
        primary: Arc<dyn TranslationEngine>,
        secondary: Option<Arc<dyn TranslationEngine>>,
        runtime: Handle,
    ) -> Result<Self, PipelineError> {
        let config = Arc::new(config);
        let events = Arc::new(EventBus::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let switches = Arc::new(RuntimeSwitches::from_config(&config));

        let cache = Arc::new(match &config.cache_path {
            Some(path) => TranslationCache::open(path, config.cache_capacity()),
            None => TranslationCache::in_memory(config.cache_capacity()),
        });
        let glossary = Arc::new(match &config.glossary_path {
            Some(path) => GlossaryProtector::from_override_file(path),
            None => GlossaryProtector::builtin(),
        });
        let history = Arc::new(match &config.history_path {
            Some(path) => HistoryStore::open(path, config.history_max, Arc::clone(&events), &runtime)?,
            None => HistoryStore::in_memory(config.history_max, Arc::clone(&events)),
        });

        let engines = Arc::new(EngineRegistry::new(
            primary,
            secondary,
            config.engine_state_path.clone(),
            Arc::clone(&events),
            Arc::clone(&metrics),
        ));
        let service = Arc::new(TranslationService::new(
            Arc::clone(&cache),
            glossary,
            Arc::clone(&metrics),
        ));
        let pending = Arc::new(PendingOutgoing::new(config.dedup_ttl()));
        let inflight = Arc::new(InflightWork::new());

        let local_identity = config.local_identity.as_deref().and_then(LocalIdentity::parse);
        let inbound = Arc::new(InboundProcessor {
            config: Arc::clone(&config),
            switches: Arc::clone(&switches),
            channels: config.channel_set(),
            local_identity,
            spam: SpamFilter::new()?,
            service: Arc::clone(&service),
            engines: Arc::clone(&engines),
            pending: Arc::clone(&pending),
            history: Arc::clone(&history),
            inflight: Arc::clone(&inflight),
            events: Arc::clone(&events),
            metrics: Arc::clone(&metrics),
            runtime: runtime.clone(),
        });
        let outbound = OutboundInterceptor::new(
            Arc::clone(&config),
            Arc::clone(&switches),
            service,
            Arc::clone(&engines),
            pending,
            Arc::clone(&events),
            Arc::clone(&metrics),
            runtime,
        );

        let active = engines.active();
        info!(
            engine = active.name(),
            state = %engines.state(),
            source = %config.source_lang,
            target = %config.target_lang,
            inbound_target = %config.inbound_target_lang,
            cached = cache.len(),
            "translation pipeline ready"
        );

        Ok(Self {
            switches,
            outbound,
            inbound,
            engines,
            cache,
            history,
            inflight,
            events,
            metrics,
        })
    }

    /// Host hook for a line about to be sent. Blocks for at most the
    /// configured outbound timeout.
    pub fn intercept_outbound(&self, text: &str) -> OutboundDecision {
        self.outbound.intercept(text)
    }

    pub async fn intercept_outbound_async(&self, text: &str) -> OutboundDecision {
        self.outbound.intercept_async(text).await
    }

    /// Host hook for every received chat line. Returns immediately; engine
    /// work continues in the background.
    pub fn observe_inbound(&self, event: &ChatEvent) -> InboundOutcome {
        if self.inflight.is_shut_down() {
            return InboundOutcome::Ignored(IgnoreReason::ShutDown);
        }
        self.inbound.process(event)
    }

    /// Master switch for both directions. Turning it off cancels in-flight
    /// inbound translations; their entries show the original text.
    pub fn set_translation_enabled(&self, enabled: bool) {
        self.switches.set_outbound(enabled);
        self.set_inbound_enabled(enabled);
    }

    pub fn set_inbound_enabled(&self, enabled: bool) {
        let was = self.switches.set_inbound(enabled);
        if was && !enabled {
            let generation = self.inflight.cancel_and_advance();
            info!(generation, in_flight = self.inflight.in_flight(), "inbound translation disabled");
        }
    }

    pub fn subscribe(&self) -> crossbeam_channel::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn engine_state(&self) -> watch::Receiver<EngineState> {
        self.engines.subscribe()
    }

    pub fn engines(&self) -> &Arc<EngineRegistry> {
        &self.engines
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Cancel outstanding inbound work, wait for it to settle and flush history.
    pub async fn shutdown(&self) {
        self.inflight.shutdown();
        self.inflight.wait().await;
        self.history.flush().await;
        info!("translation pipeline shut down");
    }
}
