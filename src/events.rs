//! Pipeline events for display and status collaborators.
//! Each subscriber gets its own unbounded crossbeam channel; publishing never
//! blocks, and subscribers that hung up are dropped on the next publish.

use crossbeam_channel as cb;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::history::DisplayMessage;
use crate::translate::Direction;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    MessageAdded(DisplayMessage),
    MessageUpdated(DisplayMessage),
    MessagesPruned { ids: Vec<String> },
    /// The primary engine was rate limited; the secondary is now active for good.
    FailedOver { from: String, to: String },
    TranslationFailed { direction: Direction, error: String },
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<cb::Sender<PipelineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> cb::Receiver<PipelineEvent> {
        let (tx, rx) = cb::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: PipelineEvent) {
        let mut subs = self.subscribers.lock();
        if subs.is_empty() {
            return;
        }
        let before = subs.len();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        if subs.len() != before {
            debug!(dropped = before - subs.len(), "event subscribers disconnected");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
