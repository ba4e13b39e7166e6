//! Persistent translation cache.
//! Key: blake3 hash of the length-prefixed (text, src_lang, tgt_lang) tuple, so
//! no choice of text can collide with a different language split.
//! First write wins; entries are only dropped when an LRU bound is configured.
//! Loaded eagerly on open, snapshotted to disk after every new entry. The
//! snapshot lists entries least recent first so a bounded reopen keeps the
//! most recently used ones.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

struct Store {
    entries: LruCache<String, String>,
    /// Set by `add`, cleared once a snapshot containing the entry is taken.
    dirty: bool,
}

pub struct TranslationCache {
    inner: Mutex<Store>,
    path: Option<PathBuf>,
    /// Serializes snapshot writes so an older snapshot never lands last.
    write_lock: Mutex<()>,
}

impl TranslationCache {
    /// Memory-only cache, used when no cache path is configured.
    pub fn in_memory(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            inner: Mutex::new(Store {
                entries: new_lru(capacity),
                dirty: false,
            }),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Open the cache backed by a JSON snapshot at `path`.
    /// A missing or corrupt snapshot yields an empty cache.
    pub fn open(path: &Path, capacity: Option<NonZeroUsize>) -> Self {
        let mut entries = new_lru(capacity);
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Vec<(String, String)>>(&content) {
                Ok(snapshot) => {
                    for (key, value) in snapshot {
                        entries.put(key, value);
                    }
                    info!(path = %path.display(), entries = entries.len(), "translation cache loaded");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "translation cache corrupt, starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no translation cache on disk yet");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "translation cache unreadable, starting empty");
            }
        }

        Self {
            inner: Mutex::new(Store {
                entries,
                dirty: false,
            }),
            path: Some(path.to_path_buf()),
            write_lock: Mutex::new(()),
        }
    }

    /// Compute the cache key from translation parameters.
    pub fn compute_key(text: &str, src_lang: &str, tgt_lang: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [text, src_lang, tgt_lang] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Look up a cached translation.
    pub fn get(&self, text: &str, src_lang: &str, tgt_lang: &str) -> Option<String> {
        let key = Self::compute_key(text, src_lang, tgt_lang);
        self.inner.lock().entries.get(&key).cloned()
    }

    /// Record a translation. Returns false (and changes nothing) when the key
    /// already exists.
    pub fn add(&self, text: &str, src_lang: &str, tgt_lang: &str, translated: &str) -> bool {
        let key = Self::compute_key(text, src_lang, tgt_lang);
        {
            let mut store = self.inner.lock();
            if store.entries.contains(&key) {
                return false;
            }
            store.entries.put(key, translated.to_string());
            store.dirty = true;
        }
        self.persist();
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a full snapshot if anything changed since the last one.
    fn persist(&self) {
        let Some(path) = self.path.as_deref() else {
            self.inner.lock().dirty = false;
            return;
        };

        let _write = self.write_lock.lock();
        let snapshot: Vec<(String, String)> = {
            let mut store = self.inner.lock();
            if !store.dirty {
                return;
            }
            store.dirty = false;
            store
                .entries
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        if let Err(e) = write_snapshot(path, &snapshot) {
            warn!(path = %path.display(), error = %e, "translation cache write failed");
            self.inner.lock().dirty = true;
        }
    }
}

fn new_lru(capacity: Option<NonZeroUsize>) -> LruCache<String, String> {
    match capacity {
        Some(cap) => LruCache::new(cap),
        None => LruCache::unbounded(),
    }
}

/// Write to a sibling temp file and rename over the target.
fn write_snapshot(path: &Path, snapshot: &[(String, String)]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec(snapshot)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
