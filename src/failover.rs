//! Engine registry and failover controller.
//! Two states: PrimaryActive (initial) -> FailedOver. A rate-limit signal
//! while PrimaryActive swaps the live engine to the secondary, persists the
//! choice and notifies subscribers. There is no automatic fail-back; only
//! `reset_to_primary` (explicit reconfiguration) leaves FailedOver.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::events::{EventBus, PipelineEvent};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::translate::TranslationEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    PrimaryActive,
    FailedOver,
}

impl EngineState {
    pub fn can_transition_to(self, next: EngineState) -> bool {
        matches!(
            (self, next),
            (EngineState::PrimaryActive, EngineState::FailedOver)
                | (EngineState::FailedOver, EngineState::PrimaryActive) // explicit reset only
        )
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::PrimaryActive => write!(f, "PrimaryActive"),
            EngineState::FailedOver => write!(f, "FailedOver"),
        }
    }
}

/// On-disk record of which engine is selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EngineSelection {
    state: EngineState,
    engine: String,
}

struct Active {
    state: EngineState,
    engine: Arc<dyn TranslationEngine>,
}

pub struct EngineRegistry {
    primary: Arc<dyn TranslationEngine>,
    secondary: Option<Arc<dyn TranslationEngine>>,
    /// State and engine are swapped together under one write lock.
    active: RwLock<Active>,
    state_tx: watch::Sender<EngineState>,
    selection_path: Option<PathBuf>,
    events: Arc<EventBus>,
    metrics: Arc<MetricsRegistry>,
}

impl EngineRegistry {
    /// Build the registry, restoring a persisted FailedOver selection when a
    /// secondary is configured.
    pub fn new(
        primary: Arc<dyn TranslationEngine>,
        secondary: Option<Arc<dyn TranslationEngine>>,
        selection_path: Option<PathBuf>,
        events: Arc<EventBus>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let restored = selection_path
            .as_deref()
            .and_then(load_selection)
            .map(|s| s.state)
            .unwrap_or(EngineState::PrimaryActive);

        let (state, engine) = match (&secondary, restored) {
            (Some(secondary), EngineState::FailedOver) => {
                info!(engine = secondary.name(), "restoring failed-over engine selection");
                (EngineState::FailedOver, Arc::clone(secondary))
            }
            _ => (EngineState::PrimaryActive, Arc::clone(&primary)),
        };
        let (state_tx, _) = watch::channel(state);

        Self {
            primary,
            secondary,
            active: RwLock::new(Active { state, engine }),
            state_tx,
            selection_path,
            events,
            metrics,
        }
    }

    /// Engine every translate call should use right now.
    pub fn active(&self) -> Arc<dyn TranslationEngine> {
        Arc::clone(&self.active.read().engine)
    }

    pub fn primary(&self) -> Arc<dyn TranslationEngine> {
        Arc::clone(&self.primary)
    }

    pub fn secondary(&self) -> Option<Arc<dyn TranslationEngine>> {
        self.secondary.clone()
    }

    pub fn state(&self) -> EngineState {
        self.active.read().state
    }

    pub fn is_failed_over(&self) -> bool {
        self.state() == EngineState::FailedOver
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    /// React to a rate-limit signal. Returns true only for the call that
    /// performed the transition; repeated signals are no-ops.
    pub fn fail_over(&self) -> bool {
        let Some(secondary) = &self.secondary else {
            debug!("rate limited with no secondary engine configured");
            return false;
        };

        let from = {
            let mut active = self.active.write();
            if !active.state.can_transition_to(EngineState::FailedOver) {
                return false;
            }
            let from = active.engine.name().to_string();
            active.state = EngineState::FailedOver;
            active.engine = Arc::clone(secondary);
            from
        };
        let to = secondary.name().to_string();

        warn!(from = %from, to = %to, "engine rate limited, failing over");
        self.persist(EngineState::FailedOver, &to);
        self.state_tx.send_replace(EngineState::FailedOver);
        self.metrics.incr(metric_names::FAILOVER);
        self.events.publish(PipelineEvent::FailedOver { from, to });
        true
    }

    /// Explicit reconfiguration back to the primary engine.
    pub fn reset_to_primary(&self) -> bool {
        {
            let mut active = self.active.write();
            if !active.state.can_transition_to(EngineState::PrimaryActive) {
                return false;
            }
            active.state = EngineState::PrimaryActive;
            active.engine = Arc::clone(&self.primary);
        }
        info!(engine = self.primary.name(), "engine selection reset to primary");
        self.persist(EngineState::PrimaryActive, self.primary.name());
        self.state_tx.send_replace(EngineState::PrimaryActive);
        true
    }

    fn persist(&self, state: EngineState, engine: &str) {
        let Some(path) = self.selection_path.as_deref() else {
            return;
        };
        let selection = EngineSelection {
            state,
            engine: engine.to_string(),
        };
        let result = serde_json::to_vec_pretty(&selection)
            .map_err(|e| e.to_string())
            .and_then(|bytes| std::fs::write(path, bytes).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "engine selection persist failed");
        }
    }
}

fn load_selection(path: &Path) -> Option<EngineSelection> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(selection) => Some(selection),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "engine selection unreadable, using primary");
            None
        }
    }
}
