//! Translation engines, the persistent translation cache and glossary protection.
//! Engines are black boxes behind [`TranslationEngine`]; only the
//! `translate(text, src, tgt) -> text | RateLimited | failure` contract matters here.

pub mod cache;
pub mod deepl;
pub mod deepseek;
pub mod glossary;
pub mod normalize;
pub mod service;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{EngineConfig, EngineKind};

/// Source language marker asking the engine to detect the language itself.
pub const AUTO_DETECT: &str = "auto";

/// A remote (or local) service mapping text between languages.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    /// Short human-readable engine name, used in logs and persisted selection.
    fn name(&self) -> &str;

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslateError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("API error: {0}")]
    Api(String),
    #[error("translation timeout")]
    Timeout,
    #[error("translation cancelled")]
    Cancelled,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TranslateError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TranslateError::RateLimited { .. })
    }
}

/// Which way a message is travelling relative to the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    OutboundIntercepted,
    InboundObserved,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::OutboundIntercepted => write!(f, "outbound"),
            Direction::InboundObserved => write!(f, "inbound"),
        }
    }
}

/// Identical-language requests never reach an engine or the cache.
pub fn is_same_language(source_lang: &str, target_lang: &str) -> bool {
    !source_lang.eq_ignore_ascii_case(AUTO_DETECT)
        && !target_lang.eq_ignore_ascii_case(AUTO_DETECT)
        && source_lang.eq_ignore_ascii_case(target_lang)
}

/// Build a concrete engine from configuration.
pub fn build_engine(config: &EngineConfig) -> Result<Arc<dyn TranslationEngine>, TranslateError> {
    match config.kind {
        EngineKind::DeepSeek => Ok(Arc::new(deepseek::DeepSeekClient::from_config(config)?)),
        EngineKind::DeepL => Ok(Arc::new(deepl::DeepLClient::from_config(config)?)),
    }
}
