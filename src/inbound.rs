//! Inbound processing: every chat line the client receives, own echoes included.
//! Lines needing an engine are appended to history in the translating state
//! and finished by a tracked background task; everything else resolves inline.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::cancellation::{GenerationGuard, InflightWork};
use crate::chat::{ChatChannel, ChatEvent};
use crate::config::{PipelineConfig, RuntimeSwitches};
use crate::dedup::PendingOutgoing;
use crate::events::{EventBus, PipelineEvent};
use crate::failover::EngineRegistry;
use crate::filter::SpamFilter;
use crate::history::{DisplayMessage, HistoryStore};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::sender::{normalize_sender, LocalIdentity};
use crate::translate::normalize::is_reliably_in;
use crate::translate::service::TranslationService;
use crate::translate::{Direction, TranslateError, AUTO_DETECT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Disabled,
    Channel,
    Blank,
    Command,
    /// Outbound events belong to the interceptor.
    NotInbound,
    ShutDown,
}

/// What happened to an inbound event. Ids refer to the history entry created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Ignored(IgnoreReason),
    SpamDropped,
    /// Echo of the user's own translated line, reunited with its original.
    Echo(String),
    Excluded(String),
    AlreadyInTarget(String),
    /// Engine work spawned; the entry is updated when it completes.
    Translating(String),
}

impl InboundOutcome {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            InboundOutcome::Echo(id)
            | InboundOutcome::Excluded(id)
            | InboundOutcome::AlreadyInTarget(id)
            | InboundOutcome::Translating(id) => Some(id),
            InboundOutcome::Ignored(_) | InboundOutcome::SpamDropped => None,
        }
    }
}

pub struct InboundProcessor {
    pub(crate) config: Arc<PipelineConfig>,
    pub(crate) switches: Arc<RuntimeSwitches>,
    pub(crate) channels: HashSet<ChatChannel>,
    pub(crate) local_identity: Option<LocalIdentity>,
    pub(crate) spam: SpamFilter,
    pub(crate) service: Arc<TranslationService>,
    pub(crate) engines: Arc<EngineRegistry>,
    pub(crate) pending: Arc<PendingOutgoing>,
    pub(crate) history: Arc<HistoryStore>,
    pub(crate) inflight: Arc<InflightWork>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) metrics: Arc<MetricsRegistry>,
    pub(crate) runtime: Handle,
}

impl InboundProcessor {
    pub fn process(self: &Arc<Self>, event: &ChatEvent) -> InboundOutcome {
        if !self.switches.inbound_enabled() {
            return InboundOutcome::Ignored(IgnoreReason::Disabled);
        }
        if event.direction != Direction::InboundObserved {
            return InboundOutcome::Ignored(IgnoreReason::NotInbound);
        }
        if !self.channels.contains(&event.channel) {
            return InboundOutcome::Ignored(IgnoreReason::Channel);
        }
        let text = event.text.as_str();
        if text.trim().is_empty() {
            return InboundOutcome::Ignored(IgnoreReason::Blank);
        }
        if self.config.is_command(text) {
            return InboundOutcome::Ignored(IgnoreReason::Command);
        }

        if self.spam.is_spam(text) {
            self.metrics.incr(metric_names::SPAM_DROPPED);
            debug!(channel = %event.channel, "spam line dropped");
            return InboundOutcome::SpamDropped;
        }

        let sender = normalize_sender(
            &event.sender,
            event.realm_hint.as_deref(),
            self.local_identity.as_ref(),
        );

        if let Some(original) = self.pending.take(text) {
            self.metrics.incr(metric_names::DEDUP_HIT);
            debug!(channel = %event.channel, "own echo matched pending outgoing line");
            let message = DisplayMessage::resolved(
                event.channel,
                sender,
                event.recipient.clone(),
                original,
                text.to_string(),
            )
            .at(event.timestamp_ms);
            return InboundOutcome::Echo(self.show(message));
        }

        if self.config.is_excluded(text) {
            let message = self.as_is(event, sender);
            return InboundOutcome::Excluded(self.show(message));
        }

        if self.config.skip_detected_target_language
            && is_reliably_in(text, &self.config.inbound_target_lang)
        {
            let message = self.as_is(event, sender);
            return InboundOutcome::AlreadyInTarget(self.show(message));
        }

        let message = DisplayMessage::translating(
            event.channel,
            sender,
            event.recipient.clone(),
            text.to_string(),
        )
        .at(event.timestamp_ms);
        let id = self.show(message);

        let guard = self.inflight.guard();
        let this = Arc::clone(self);
        let task_id = id.clone();
        let original = text.to_string();
        self.inflight.spawn(&self.runtime, async move {
            this.finish(task_id, original, guard).await;
        });

        InboundOutcome::Translating(id)
    }

    fn as_is(&self, event: &ChatEvent, sender: String) -> DisplayMessage {
        DisplayMessage::resolved(
            event.channel,
            sender,
            event.recipient.clone(),
            event.text.clone(),
            event.text.clone(),
        )
        .at(event.timestamp_ms)
    }

    fn show(&self, message: DisplayMessage) -> String {
        let id = message.id.clone();
        self.history.append(message);
        id
    }

    /// Background half: translate, then finalize the history entry. Never
    /// leaves the entry blank or in flight.
    async fn finish(&self, id: String, original: String, guard: GenerationGuard) {
        let span = self.metrics.span(metric_names::INBOUND_TRANSLATE);
        let result = tokio::select! {
            result = self.translate_with_retry(&original) => result,
            _ = guard.token().cancelled() => Err(TranslateError::Cancelled),
        };
        // A result that raced a disable or shutdown is stale.
        let result = if guard.should_continue() {
            result
        } else {
            Err(TranslateError::Cancelled)
        };

        let rendered = match result {
            Ok(translated) if !translated.trim().is_empty() => translated,
            Ok(_) => original.clone(),
            Err(TranslateError::Cancelled) => {
                debug!(id = %id, "inbound translation cancelled, showing original");
                original.clone()
            }
            Err(e) => {
                warn!(id = %id, error = %e, "inbound translation failed, showing original");
                self.events.publish(PipelineEvent::TranslationFailed {
                    direction: Direction::InboundObserved,
                    error: e.to_string(),
                });
                original.clone()
            }
        };

        let updated = self.history.update(&id, |message| {
            message.translated_text = rendered;
            message.in_flight = false;
        });
        if updated.is_none() {
            debug!(id = %id, "message pruned before translation finished");
        }
        span.finish();
    }

    /// One attempt on the active engine; on a rate limit, one more on the
    /// secondary, which becomes permanent if it succeeds.
    async fn translate_with_retry(&self, text: &str) -> Result<String, TranslateError> {
        let target = self.config.inbound_target_lang.as_str();
        let engine = self.engines.active();
        let error = match self
            .service
            .translate(engine.as_ref(), text, AUTO_DETECT, target)
            .await
        {
            Ok(translation) => return Ok(translation.text),
            Err(e) => e,
        };
        if !error.is_rate_limited() {
            return Err(error);
        }

        let secondary = match self.engines.secondary() {
            Some(secondary) if !Arc::ptr_eq(&secondary, &engine) => secondary,
            _ => return Err(error),
        };
        info!(
            from = engine.name(),
            to = secondary.name(),
            "inbound rate limited, retrying on secondary"
        );
        let translation = self
            .service
            .translate(secondary.as_ref(), text, AUTO_DETECT, target)
            .await?;
        self.engines.fail_over();
        Ok(translation.text)
    }
}
