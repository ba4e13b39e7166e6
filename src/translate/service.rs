//! Shared translate path used by both directions:
//! same-language short-circuit -> cache -> glossary protect -> engine -> restore -> cache.

use std::sync::Arc;

use tracing::debug;

use crate::metrics::{metric_names, MetricsRegistry};

use super::cache::TranslationCache;
use super::glossary::GlossaryProtector;
use super::{is_same_language, TranslateError, TranslationEngine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    pub cached: bool,
}

pub struct TranslationService {
    cache: Arc<TranslationCache>,
    glossary: Arc<GlossaryProtector>,
    metrics: Arc<MetricsRegistry>,
}

impl TranslationService {
    pub fn new(
        cache: Arc<TranslationCache>,
        glossary: Arc<GlossaryProtector>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            cache,
            glossary,
            metrics,
        }
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    /// Translate `text` with `engine`. Only successful, non-empty results that
    /// differ from the input are cached; same-language requests touch neither
    /// the engine nor the cache.
    pub async fn translate(
        &self,
        engine: &dyn TranslationEngine,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Translation, TranslateError> {
        if is_same_language(source_lang, target_lang) {
            return Ok(Translation {
                text: text.to_string(),
                cached: false,
            });
        }

        if let Some(hit) = self.cache.get(text, source_lang, target_lang) {
            self.metrics.incr(metric_names::CACHE_HIT);
            return Ok(Translation {
                text: hit,
                cached: true,
            });
        }
        self.metrics.incr(metric_names::CACHE_MISS);

        let protected = self.glossary.protect(text);
        let span = self.metrics.span(metric_names::ENGINE_CALL);
        let result = engine
            .translate(&protected.text, source_lang, target_lang)
            .await;
        let elapsed_us = span.finish();

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                self.metrics.incr(if e.is_rate_limited() {
                    metric_names::RATE_LIMITED
                } else {
                    metric_names::ENGINE_FAILURE
                });
                return Err(e);
            }
        };

        let translated = self.glossary.restore(raw.trim(), &protected.placeholders);
        debug!(
            engine = engine.name(),
            elapsed_ms = elapsed_us / 1000.0,
            terms = protected.placeholders.len(),
            "engine translation done"
        );

        if !translated.is_empty() && translated != text {
            self.cache.add(text, source_lang, target_lang, &translated);
        }
        Ok(Translation {
            text: translated,
            cached: false,
        })
    }
}
