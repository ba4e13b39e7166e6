//! Pipeline configuration, loaded from JSON. Every field has a default so a
//! partial file (or no file at all) still yields a working setup.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::chat::ChatChannel;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    DeepSeek,
    DeepL,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Environment variable holding the API key. Engine-specific default when absent.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_engine_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_engine_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Outbound (own messages) translation switch.
    pub translation_enabled: bool,
    pub inbound_enabled: bool,
    /// Language the local user writes in.
    pub source_lang: String,
    /// Language outbound messages are translated into.
    pub target_lang: String,
    /// Language inbound messages are rendered in.
    pub inbound_target_lang: String,
    pub command_prefixes: Vec<String>,
    /// Lines never translated (matched trimmed, case-insensitive).
    pub exclusions: Vec<String>,
    pub translated_channels: Vec<ChatChannel>,
    /// Local character as `Name@Realm`.
    pub local_identity: Option<String>,
    pub history_max: usize,
    pub max_outbound_bytes: usize,
    pub outbound_timeout_ms: u64,
    pub dedup_ttl_secs: u64,
    pub skip_detected_target_language: bool,
    /// LRU bound for the translation cache; unbounded when absent.
    pub cache_capacity: Option<usize>,
    pub cache_path: Option<PathBuf>,
    pub history_path: Option<PathBuf>,
    pub engine_state_path: Option<PathBuf>,
    pub glossary_path: Option<PathBuf>,
    pub primary_engine: Option<EngineConfig>,
    pub secondary_engine: Option<EngineConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            translation_enabled: true,
            inbound_enabled: true,
            source_lang: "en".into(),
            target_lang: "ja".into(),
            inbound_target_lang: "en".into(),
            command_prefixes: vec!["/".into()],
            exclusions: ["gg", "o/", "\\o", "ty", "tyvm", "thx", "lol", "brb", "afk", "ok", "kk"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            translated_channels: ChatChannel::default_translated(),
            local_identity: None,
            history_max: 200,
            max_outbound_bytes: 500,
            outbound_timeout_ms: 5_000,
            dedup_ttl_secs: 30,
            skip_detected_target_language: true,
            cache_capacity: None,
            cache_path: None,
            history_path: None,
            engine_state_path: None,
            glossary_path: None,
            primary_engine: Some(EngineConfig {
                kind: EngineKind::DeepSeek,
                api_key_env: None,
                base_url: None,
                model: None,
                timeout_ms: default_engine_timeout_ms(),
            }),
            secondary_engine: None,
        }
    }
}

impl PipelineConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        info!(path = %path.display(), "pipeline config loaded");
        Ok(config)
    }

    /// Load `path`, falling back to defaults when it is missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load_from_file(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "config load failed, using defaults");
            Self::default()
        })
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_millis(self.outbound_timeout_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn cache_capacity(&self) -> Option<NonZeroUsize> {
        self.cache_capacity.and_then(NonZeroUsize::new)
    }

    pub fn channel_set(&self) -> HashSet<ChatChannel> {
        self.translated_channels.iter().copied().collect()
    }

    pub fn is_command(&self, text: &str) -> bool {
        let trimmed = text.trim_start();
        self.command_prefixes
            .iter()
            .any(|p| !p.is_empty() && trimmed.starts_with(p.as_str()))
    }

    pub fn is_excluded(&self, text: &str) -> bool {
        let trimmed = text.trim();
        self.exclusions
            .iter()
            .any(|e| e.trim().eq_ignore_ascii_case(trimmed))
    }
}

/// Toggles that can flip while the pipeline runs.
#[derive(Debug)]
pub struct RuntimeSwitches {
    outbound: AtomicBool,
    inbound: AtomicBool,
}

impl RuntimeSwitches {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            outbound: AtomicBool::new(config.translation_enabled),
            inbound: AtomicBool::new(config.inbound_enabled),
        }
    }

    pub fn outbound_enabled(&self) -> bool {
        self.outbound.load(Ordering::Acquire)
    }

    pub fn inbound_enabled(&self) -> bool {
        self.inbound.load(Ordering::Acquire)
    }

    /// Returns the previous value.
    pub fn set_outbound(&self, enabled: bool) -> bool {
        self.outbound.swap(enabled, Ordering::AcqRel)
    }

    pub fn set_inbound(&self, enabled: bool) -> bool {
        self.inbound.swap(enabled, Ordering::AcqRel)
    }
}
