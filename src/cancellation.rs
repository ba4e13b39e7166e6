//! Cancellation for in-flight inbound translations: CancellationToken +
//! generation guard + task tracking.
//! Turning translation off advances the generation, which cancels every task
//! started before it; shutdown cancels everything and lets callers wait for
//! the tasks to wind down.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct InflightWork {
    /// Parent of every generation token; cancelled once on shutdown.
    root: CancellationToken,
    current_token: RwLock<CancellationToken>,
    generation: Arc<AtomicU64>,
    tracker: TaskTracker,
}

impl Default for InflightWork {
    fn default() -> Self {
        Self::new()
    }
}

impl InflightWork {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let current = root.child_token();
        Self {
            root,
            current_token: RwLock::new(current),
            generation: Arc::new(AtomicU64::new(0)),
            tracker: TaskTracker::new(),
        }
    }

    /// Guard for a task started now.
    pub fn guard(&self) -> GenerationGuard {
        let token_guard = self.current_token.read();
        GenerationGuard {
            generation: Arc::clone(&self.generation),
            my_generation: self.generation.load(Ordering::SeqCst),
            token: token_guard.child_token(),
        }
    }

    /// Cancel all current tasks and start a new generation.
    pub fn cancel_and_advance(&self) -> u64 {
        let mut token_guard = self.current_token.write();
        token_guard.cancel();
        *token_guard = self.root.child_token();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Spawn a tracked task on `runtime`.
    pub fn spawn<F>(&self, runtime: &tokio::runtime::Handle, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn_on(task, runtime);
    }

    /// Number of tracked tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel everything; no new generation will be handed out uncancelled.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.tracker.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Wait for every tracked task to finish. Only returns after `shutdown`.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }
}

/// Guard that a task checks before writing results.
/// If the generation has advanced past `my_generation`, the task is stale.
#[derive(Clone)]
pub struct GenerationGuard {
    generation: Arc<AtomicU64>,
    my_generation: u64,
    token: CancellationToken,
}

impl GenerationGuard {
    /// Returns true if this task is still the current generation.
    #[inline]
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns true if the task should continue (not cancelled and still current).
    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
