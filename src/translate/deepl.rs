//! DeepL REST client. Usually configured as the secondary engine.
//! 429 (too many requests) and 456 (quota exceeded) both count as rate limiting.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::deepseek::retry_after_ms;
use super::{TranslateError, TranslationEngine, AUTO_DETECT};
use crate::config::EngineConfig;

const DEFAULT_BASE_URL: &str = "https://api-free.deepl.com";

pub struct DeepLClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct DeepLRequest<'a> {
    text: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    source_lang: Option<String>,
    target_lang: String,
    /// Keeps placeholder tokens and chat shorthand intact.
    preserve_formatting: bool,
}

#[derive(Deserialize)]
struct DeepLResponse {
    translations: Vec<DeepLTranslation>,
}

#[derive(Deserialize)]
struct DeepLTranslation {
    text: String,
}

impl DeepLClient {
    pub fn from_config(config: &EngineConfig) -> Result<Self, TranslateError> {
        let key_var = config.api_key_env.as_deref().unwrap_or("DEEPL_API_KEY");
        let api_key = std::env::var(key_var).map_err(|_| {
            TranslateError::InvalidInput(format!("{key_var} environment variable not set"))
        })?;

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| TranslateError::Api(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
        })
    }
}

#[async_trait]
impl TranslationEngine for DeepLClient {
    fn name(&self) -> &str {
        "deepl"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslateError> {
        let request = DeepLRequest {
            text: [text],
            source_lang: deepl_source(source_lang),
            target_lang: deepl_target(target_lang),
            preserve_formatting: true,
        };

        let resp = self
            .http
            .post(format!("{}/v2/translate", self.base_url))
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranslateError::Timeout
                } else {
                    TranslateError::Api(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        if status == 429 || status == 456 {
            let retry_after_ms = retry_after_ms(resp.headers());
            warn!(status, retry_after_ms, "deepl rate limited");
            return Err(TranslateError::RateLimited { retry_after_ms });
        }
        if !resp.status().is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(TranslateError::Api(format!(
                "unexpected status {}: {}",
                status,
                body_text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: DeepLResponse = resp
            .json()
            .await
            .map_err(|e| TranslateError::Api(format!("malformed response: {e}")))?;
        let translated = parsed
            .translations
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| TranslateError::Api("empty translation list".into()))?;

        debug!(chars = translated.chars().count(), "deepl translation complete");
        Ok(translated)
    }
}

/// DeepL detects the language itself when `source_lang` is omitted.
fn deepl_source(lang: &str) -> Option<String> {
    if lang.eq_ignore_ascii_case(AUTO_DETECT) {
        None
    } else {
        Some(base_code(lang).to_ascii_uppercase())
    }
}

/// DeepL rejects bare "en"/"pt" as targets.
fn deepl_target(lang: &str) -> String {
    match lang.to_ascii_lowercase().as_str() {
        "en" => "EN-US".into(),
        "pt" => "PT-BR".into(),
        "zh" => "ZH-HANS".into(),
        other => other.to_ascii_uppercase(),
    }
}

fn base_code(lang: &str) -> &str {
    lang.split(['-', '_']).next().unwrap_or(lang)
}
