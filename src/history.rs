//! Bounded, ordered record of displayed chat lines.
//! The in-memory list is authoritative; when a database path is given every
//! append/update/prune is also queued to a background writer that batches the
//! changes into SQLite, so the chat path never waits on disk I/O.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::chat::{now_unix_ms, ChatChannel};
use crate::events::{EventBus, PipelineEvent};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// One rendered chat line. Created in-flight (empty translation) when the
/// engine call is still pending, then updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMessage {
    pub id: String,
    pub timestamp_ms: i64,
    pub channel: ChatChannel,
    pub sender: String,
    pub recipient: Option<String>,
    pub original_text: String,
    pub translated_text: String,
    pub in_flight: bool,
}

impl DisplayMessage {
    /// Placeholder shown while the translation is pending.
    pub fn translating(
        channel: ChatChannel,
        sender: String,
        recipient: Option<String>,
        original_text: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms: now_unix_ms(),
            channel,
            sender,
            recipient,
            original_text,
            translated_text: String::new(),
            in_flight: true,
        }
    }

    /// Final message needing no engine call.
    pub fn resolved(
        channel: ChatChannel,
        sender: String,
        recipient: Option<String>,
        original_text: String,
        translated_text: String,
    ) -> Self {
        Self {
            translated_text,
            in_flight: false,
            ..Self::translating(channel, sender, recipient, original_text)
        }
    }

    /// Stamp with the time the host captured the line.
    pub fn at(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }
}

enum HistoryOp {
    Upsert { message: DisplayMessage, seq: i64 },
    Delete(Vec<String>),
    Flush(oneshot::Sender<()>),
}

pub struct HistoryStore {
    messages: Mutex<VecDeque<DisplayMessage>>,
    max: usize,
    next_seq: AtomicI64,
    writer: Option<mpsc::UnboundedSender<HistoryOp>>,
    events: Arc<EventBus>,
}

impl HistoryStore {
    pub fn in_memory(max: usize, events: Arc<EventBus>) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(max.min(1024))),
            max: max.max(1),
            next_seq: AtomicI64::new(1),
            writer: None,
            events,
        }
    }

    /// Open (or create) the history database, load the newest `max` messages
    /// and start the background writer on `runtime`.
    pub fn open(
        db_path: &Path,
        max: usize,
        events: Arc<EventBus>,
        runtime: &tokio::runtime::Handle,
    ) -> Result<Self, HistoryError> {
        let max = max.max(1);
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                channel INTEGER NOT NULL,
                sender TEXT NOT NULL,
                recipient TEXT,
                original_text TEXT NOT NULL,
                translated_text TEXT NOT NULL,
                in_flight INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_history_seq ON history(seq);",
        )?;

        let (loaded, last_seq) = load_recent(&conn, max)?;
        if let Some(first) = loaded.first() {
            // Rows that fell out of the window while the process was down.
            let oldest_kept: i64 = conn.query_row(
                "SELECT seq FROM history WHERE id = ?1",
                params![first.id],
                |row| row.get(0),
            )?;
            let removed = conn.execute("DELETE FROM history WHERE seq < ?1", params![oldest_kept])?;
            if removed > 0 {
                debug!(removed, "history rows pruned on load");
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(flush_loop(rx, conn));

        info!(path = %db_path.display(), loaded = loaded.len(), max, "history store opened");

        Ok(Self {
            messages: Mutex::new(loaded.into_iter().collect()),
            max,
            next_seq: AtomicI64::new(last_seq + 1),
            writer: Some(tx),
            events,
        })
    }

    /// Append a message, pruning the oldest entries beyond the bound.
    /// Writer and subscribers see changes in the same order as the list.
    pub fn append(&self, message: DisplayMessage) {
        let mut messages = self.messages.lock();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        messages.push_back(message.clone());
        let excess = messages.len().saturating_sub(self.max);
        let pruned: Vec<String> = messages.drain(..excess).map(|m| m.id).collect();

        self.write(HistoryOp::Upsert {
            message: message.clone(),
            seq,
        });
        self.events.publish(PipelineEvent::MessageAdded(message));

        if !pruned.is_empty() {
            self.write(HistoryOp::Delete(pruned.clone()));
            self.events
                .publish(PipelineEvent::MessagesPruned { ids: pruned });
        }
    }

    /// Mutate a message in place. Returns the updated copy, or None when the
    /// message has already been pruned.
    pub fn update<F>(&self, id: &str, mutate: F) -> Option<DisplayMessage>
    where
        F: FnOnce(&mut DisplayMessage),
    {
        let mut messages = self.messages.lock();
        let message = messages.iter_mut().find(|m| m.id == id)?;
        mutate(message);
        let updated = message.clone();

        self.write(HistoryOp::Upsert {
            message: updated.clone(),
            seq: 0,
        });
        self.events
            .publish(PipelineEvent::MessageUpdated(updated.clone()));
        Some(updated)
    }

    pub fn get(&self, id: &str) -> Option<DisplayMessage> {
        self.messages.lock().iter().find(|m| m.id == id).cloned()
    }

    /// Messages in arrival order.
    pub fn snapshot(&self) -> Vec<DisplayMessage> {
        self.messages.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Wait until every queued change has been committed. No-op in memory.
    pub async fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writer.send(HistoryOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn write(&self, op: HistoryOp) {
        if let Some(writer) = &self.writer {
            if writer.send(op).is_err() {
                warn!("history writer gone, change not persisted");
            }
        }
    }
}

/// Newest `max` rows in arrival order, plus the highest seq seen.
/// Rows left in-flight by a previous session are finalized with their original text.
fn load_recent(conn: &Connection, max: usize) -> Result<(Vec<DisplayMessage>, i64), HistoryError> {
    let last_seq: i64 = conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM history", [], |row| {
        row.get(0)
    })?;

    let mut stmt = conn.prepare(
        "SELECT id, timestamp_ms, channel, sender, recipient, original_text,
                translated_text, in_flight
         FROM history ORDER BY seq DESC LIMIT ?1",
    )?;
    let mut messages = stmt
        .query_map(params![max as i64], |row| {
            let in_flight = row.get::<_, i32>(7)? != 0;
            let original_text: String = row.get(5)?;
            let translated_text: String = row.get(6)?;
            Ok(DisplayMessage {
                id: row.get(0)?,
                timestamp_ms: row.get(1)?,
                channel: ChatChannel::from_id(row.get::<_, u16>(2)?),
                sender: row.get(3)?,
                recipient: row.get(4)?,
                translated_text: if in_flight {
                    original_text.clone()
                } else {
                    translated_text
                },
                original_text,
                in_flight: false,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    messages.reverse();
    Ok((messages, last_seq))
}

/// Background writer: collects changes from the channel and applies them in
/// one transaction per wake-up.
async fn flush_loop(mut rx: mpsc::UnboundedReceiver<HistoryOp>, conn: Connection) {
    let flush_interval = Duration::from_millis(300);
    let mut buffer: Vec<HistoryOp> = Vec::with_capacity(32);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(flush_interval) => {}
            msg = rx.recv() => {
                match msg {
                    Some(op) => buffer.push(op),
                    None => {
                        if !buffer.is_empty() {
                            apply_batch(&conn, std::mem::take(&mut buffer));
                        }
                        info!("history writer exiting (channel closed)");
                        return;
                    }
                }
            }
        }

        while let Ok(op) = rx.try_recv() {
            buffer.push(op);
        }

        if !buffer.is_empty() {
            apply_batch(&conn, std::mem::take(&mut buffer));
        }
    }
}

fn apply_batch(conn: &Connection, ops: Vec<HistoryOp>) {
    let start = std::time::Instant::now();
    let mut acks = Vec::new();
    let count = ops.len();

    if let Err(e) = conn.execute_batch("BEGIN TRANSACTION") {
        warn!(error = %e, "history batch begin failed");
        return;
    }

    for op in ops {
        let result = match op {
            HistoryOp::Upsert { message, seq } => conn
                .execute(
                    "INSERT INTO history
                     (id, seq, timestamp_ms, channel, sender, recipient,
                      original_text, translated_text, in_flight)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(id) DO UPDATE SET
                        original_text = excluded.original_text,
                        translated_text = excluded.translated_text,
                        in_flight = excluded.in_flight",
                    params![
                        message.id,
                        seq,
                        message.timestamp_ms,
                        message.channel.id(),
                        message.sender,
                        message.recipient,
                        message.original_text,
                        message.translated_text,
                        message.in_flight as i32,
                    ],
                )
                .map(|_| ()),
            HistoryOp::Delete(ids) => ids.iter().try_for_each(|id| {
                conn.execute("DELETE FROM history WHERE id = ?1", params![id])
                    .map(|_| ())
            }),
            HistoryOp::Flush(ack) => {
                acks.push(ack);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "history write failed");
        }
    }

    if let Err(e) = conn.execute_batch("COMMIT") {
        warn!(error = %e, "history batch commit failed");
    } else {
        debug!(
            count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "history batch flushed"
        );
    }

    for ack in acks {
        let _ = ack.send(());
    }
}
