//! Parley: two-way chat translation pipeline.
//! Outbound lines are translated before the host sends them, inbound lines are
//! translated for display, and the user's own translated lines are recognised
//! when they echo back. Translations are cached and glossary-protected; a
//! rate-limited primary engine fails over to a secondary for the session.

pub mod cancellation;
pub mod chat;
pub mod config;
pub mod dedup;
pub mod events;
pub mod failover;
pub mod filter;
pub mod history;
pub mod inbound;
pub mod metrics;
pub mod outbound;
pub mod pipeline;
pub mod sender;
pub mod translate;

pub use chat::{ChatChannel, ChatEvent};
pub use config::{EngineConfig, EngineKind, PipelineConfig};
pub use events::PipelineEvent;
pub use failover::EngineState;
pub use history::DisplayMessage;
pub use inbound::InboundOutcome;
pub use outbound::OutboundDecision;
pub use pipeline::{Pipeline, PipelineError};
pub use translate::{TranslateError, TranslationEngine};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `parley=debug` filter. Safe to call more than once.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_ok() {
        tracing::info!(json, "parley tracing initialized");
    }
}
