//! Outbound interception: the user's line is translated before the host
//! transmits it. The host calls in synchronously on its dispatch thread, so
//! the engine round-trip is awaited with a hard timeout and every failure
//! resolves to sending the original text.

use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, RuntimeSwitches};
use crate::dedup::PendingOutgoing;
use crate::events::{EventBus, PipelineEvent};
use crate::failover::EngineRegistry;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::translate::service::TranslationService;
use crate::translate::{Direction, TranslateError};

/// Appended when a payload had to be cut to fit the transport.
pub const TRUNCATION_MARKER: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    Disabled,
    Blank,
    Command,
    Excluded,
    /// The engine (or cache) produced the original text or nothing.
    Unchanged,
    RateLimited,
    EngineFailure,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundDecision {
    /// Transmit the original bytes untouched.
    PassThrough { text: String, reason: PassReason },
    /// Transmit `transmitted` in place of `original`.
    Translated { original: String, transmitted: String },
}

impl OutboundDecision {
    /// Text the host should send.
    pub fn text(&self) -> &str {
        match self {
            OutboundDecision::PassThrough { text, .. } => text,
            OutboundDecision::Translated { transmitted, .. } => transmitted,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            OutboundDecision::PassThrough { text, .. } => text,
            OutboundDecision::Translated { transmitted, .. } => transmitted,
        }
    }

    pub fn is_translated(&self) -> bool {
        matches!(self, OutboundDecision::Translated { .. })
    }

    fn pass(text: &str, reason: PassReason) -> Self {
        OutboundDecision::PassThrough {
            text: text.to_string(),
            reason,
        }
    }
}

pub struct OutboundInterceptor {
    config: Arc<PipelineConfig>,
    switches: Arc<RuntimeSwitches>,
    service: Arc<TranslationService>,
    engines: Arc<EngineRegistry>,
    pending: Arc<PendingOutgoing>,
    events: Arc<EventBus>,
    metrics: Arc<MetricsRegistry>,
    runtime: Handle,
}

impl OutboundInterceptor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<PipelineConfig>,
        switches: Arc<RuntimeSwitches>,
        service: Arc<TranslationService>,
        engines: Arc<EngineRegistry>,
        pending: Arc<PendingOutgoing>,
        events: Arc<EventBus>,
        metrics: Arc<MetricsRegistry>,
        runtime: Handle,
    ) -> Self {
        Self {
            config,
            switches,
            service,
            engines,
            pending,
            events,
            metrics,
            runtime,
        }
    }

    /// Blocking entry point for the host dispatch thread.
    pub fn intercept(&self, text: &str) -> OutboundDecision {
        if let Some(decision) = self.route(text) {
            return decision;
        }

        match Handle::try_current() {
            Err(_) => self.runtime.block_on(self.translate_bounded(text)),
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.runtime.block_on(self.translate_bounded(text)))
            }
            Ok(_) => {
                warn!("outbound intercept called from a current-thread runtime, sending original");
                OutboundDecision::pass(text, PassReason::EngineFailure)
            }
        }
    }

    /// Same decision sequence for callers that are already async.
    pub async fn intercept_async(&self, text: &str) -> OutboundDecision {
        match self.route(text) {
            Some(decision) => decision,
            None => self.translate_bounded(text).await,
        }
    }

    /// Routing checks that never need an engine.
    fn route(&self, text: &str) -> Option<OutboundDecision> {
        let reason = if !self.switches.outbound_enabled() {
            PassReason::Disabled
        } else if text.trim().is_empty() {
            PassReason::Blank
        } else if self.config.is_command(text) {
            PassReason::Command
        } else if self.config.is_excluded(text) {
            PassReason::Excluded
        } else {
            return None;
        };
        debug!(?reason, "outbound passed through");
        Some(OutboundDecision::pass(text, reason))
    }

    async fn translate_bounded(&self, text: &str) -> OutboundDecision {
        let span = self.metrics.span(metric_names::OUTBOUND_INTERCEPT);
        let engine = self.engines.active();
        let result = tokio::time::timeout(
            self.config.outbound_timeout(),
            self.service.translate(
                engine.as_ref(),
                text,
                &self.config.source_lang,
                &self.config.target_lang,
            ),
        )
        .await;
        span.finish();

        let translated = match result {
            Ok(Ok(translation)) => translation.text,
            Ok(Err(e)) if e.is_rate_limited() => {
                warn!(engine = engine.name(), error = %e, "outbound rate limited, sending original");
                self.engines.fail_over();
                return OutboundDecision::pass(text, PassReason::RateLimited);
            }
            Ok(Err(e)) => {
                warn!(engine = engine.name(), error = %e, "outbound translation failed, sending original");
                self.report_failure(&e);
                return OutboundDecision::pass(text, PassReason::EngineFailure);
            }
            Err(_) => {
                warn!(
                    engine = engine.name(),
                    timeout_ms = self.config.outbound_timeout_ms,
                    "outbound translation timed out, sending original"
                );
                self.metrics.incr(metric_names::OUTBOUND_TIMEOUT);
                self.report_failure(&TranslateError::Timeout);
                return OutboundDecision::pass(text, PassReason::TimedOut);
            }
        };

        if translated.trim().is_empty() || translated == text {
            return OutboundDecision::pass(text, PassReason::Unchanged);
        }

        let transmitted = sanitize_outbound(&translated, self.config.max_outbound_bytes);
        if transmitted.is_empty() {
            return OutboundDecision::pass(text, PassReason::Unchanged);
        }
        // The host echoes exactly what was transmitted.
        self.pending.register(&transmitted, text);
        info!(bytes = transmitted.len(), "outbound line translated");

        OutboundDecision::Translated {
            original: text.to_string(),
            transmitted,
        }
    }

    fn report_failure(&self, error: &TranslateError) {
        self.events.publish(PipelineEvent::TranslationFailed {
            direction: Direction::OutboundIntercepted,
            error: error.to_string(),
        });
    }
}

/// Make a payload safe for the host transport: drop NUL/CR and other control
/// characters, turn line breaks into single spaces and cut to `max_bytes`
/// (marker included) on a char boundary.
pub fn sanitize_outbound(text: &str, max_bytes: usize) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' | '\t' => {
                if !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    let out = out.trim();

    if out.len() <= max_bytes {
        return out.to_string();
    }

    // Budgets too small for the marker get a bare cut.
    let marker = if max_bytes > TRUNCATION_MARKER.len() {
        TRUNCATION_MARKER
    } else {
        ""
    };
    let mut end = max_bytes - marker.len();
    while !out.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = out[..end].trim_end().to_string();
    truncated.push_str(marker);
    truncated
}
