//! Pending outgoing map: transmitted (translated) text -> the original the
//! user typed. The outbound path registers an entry right before the host sends
//! the line; the inbound path consumes it when the same line echoes back.
//!
//! Each key holds a FIFO of originals so two lines that happen to translate to
//! the same text reunite in send order. Entries whose echo never arrives are
//! dropped after `ttl`.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

struct Pending {
    original: String,
    registered_at: Instant,
}

pub struct PendingOutgoing {
    entries: Mutex<HashMap<String, VecDeque<Pending>>>,
    ttl: Duration,
}

impl PendingOutgoing {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn register(&self, transmitted: &str, original: &str) {
        let mut entries = self.entries.lock();
        let ttl = self.ttl;
        let before: usize = entries.values().map(VecDeque::len).sum();
        entries.retain(|_, queue| {
            queue.retain(|p| p.registered_at.elapsed() < ttl);
            !queue.is_empty()
        });
        let after: usize = entries.values().map(VecDeque::len).sum();
        if after < before {
            debug!(expired = before - after, "pending outgoing entries expired");
        }

        entries
            .entry(transmitted.to_string())
            .or_default()
            .push_back(Pending {
                original: original.to_string(),
                registered_at: Instant::now(),
            });
    }

    /// Remove and return the oldest live original registered for `text`.
    /// Lookup and removal happen under one lock.
    pub fn take(&self, text: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let queue = entries.get_mut(text)?;
        let mut found = None;
        while let Some(p) = queue.pop_front() {
            if p.registered_at.elapsed() < self.ttl {
                found = Some(p.original);
                break;
            }
        }
        if queue.is_empty() {
            entries.remove(text);
        }
        found
    }

    pub fn len(&self) -> usize {
        self.entries.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
