//! DeepSeek API translation client.
//! Connection pooling via reqwest, simple request pacing, retry on 5xx and
//! timeouts. A 429 is surfaced immediately as `RateLimited` so the failover
//! controller can react instead of this client sleeping on the dispatch path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{TranslateError, TranslationEngine, AUTO_DETECT};
use crate::config::EngineConfig;

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_MODEL: &str = "deepseek-chat";

/// DeepSeek chat/completions client.
pub struct DeepSeekClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    /// Simple token-bucket: tracks the next allowed request time.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    /// Minimum interval between requests (e.g. 100ms = 10 req/s).
    min_interval: Duration,
}

impl DeepSeekClient {
    /// Create a client, reading the API key from the configured environment variable.
    pub fn from_config(config: &EngineConfig) -> Result<Self, TranslateError> {
        let key_var = config.api_key_env.as_deref().unwrap_or("DEEPSEEK_API_KEY");
        let api_key = std::env::var(key_var).map_err(|_| {
            TranslateError::InvalidInput(format!("{key_var} environment variable not set"))
        })?;

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
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
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.into()),
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval: Duration::from_millis(100),
        })
    }

    /// Wait until the pacing window allows a request.
    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    /// Send request with retry logic.
    /// 429: returned at once as `RateLimited`.
    /// 5xx: exponential backoff (max 2).
    /// Timeout: immediate retry once.
    async fn send_with_retry(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, TranslateError> {
        let mut attempt: u32 = 0;
        let max_5xx_retries: u32 = 2;
        let mut timeout_retried = false;

        loop {
            let result = self
                .http
                .post(format!("{}/v1/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let retry_after_ms = retry_after_ms(resp.headers());
                    warn!(retry_after_ms, "deepseek 429 rate limited");
                    return Err(TranslateError::RateLimited { retry_after_ms });
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= max_5xx_retries {
                        return Err(TranslateError::Api(format!(
                            "server error: {}",
                            resp.status()
                        )));
                    }
                    let wait = Duration::from_millis(500 * (1 << attempt));
                    warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(TranslateError::Api(format!(
                        "unexpected status {}: {}",
                        status,
                        body_text.chars().take(200).collect::<String>()
                    )));
                }
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(TranslateError::Timeout);
                    }
                    warn!("request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => return Err(TranslateError::Api(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl TranslationEngine for DeepSeekClient {
    fn name(&self) -> &str {
        "deepseek"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslateError> {
        self.rate_limit_wait().await;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_user_prompt(text, source_lang, target_lang)}
            ],
            "max_tokens": estimate_max_tokens(text),
            "stream": false,
            "temperature": 0.1
        });

        let start = Instant::now();
        let response = self.send_with_retry(&body).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::Api(format!("malformed response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TranslateError::Api("empty completion".into()))?;

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "deepseek translation complete"
        );
        Ok(content.trim().to_string())
    }
}

// --- Prompt construction ---

/// Placeholder tokens (XQ..QX) are glossary terms and must survive untouched.
const SYSTEM_PROMPT: &str = "You are a chat translator. Output only the translation, nothing else. \
Keep tokens of the form XQ..QX exactly as written.";

/// Compact user prompt: {"t":"text","l":"lang"} or {"t":"text","s":"src","l":"lang"}.
fn build_user_prompt(text: &str, source_lang: &str, target_lang: &str) -> String {
    let escaped = escape_json_string(text);
    let lang = escape_json_string(target_lang);
    if source_lang.eq_ignore_ascii_case(AUTO_DETECT) {
        format!("{{\"t\":\"{}\",\"l\":\"{}\"}}", escaped, lang)
    } else {
        format!(
            "{{\"t\":\"{}\",\"s\":\"{}\",\"l\":\"{}\"}}",
            escaped,
            escape_json_string(source_lang),
            lang
        )
    }
}

/// Chat lines are short: (input_tokens * 1.15 + 32), clamped to [64, 384].
fn estimate_max_tokens(text: &str) -> u32 {
    let estimated_input_tokens = text.len() as f64 / 3.0;
    let max = (estimated_input_tokens * 1.15 + 32.0) as u32;
    max.clamp(64, 384)
}

/// Escape a string for embedding inside a JSON string value.
fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Parse a `Retry-After` header given in seconds. Absurd values saturate.
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
        .unwrap_or(0)
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_omits_source_for_auto_detect() {
        assert_eq!(
            build_user_prompt("hi \"there\"", "auto", "ja"),
            "{\"t\":\"hi \\\"there\\\"\",\"l\":\"ja\"}"
        );
        assert_eq!(
            build_user_prompt("hi", "en", "ja"),
            "{\"t\":\"hi\",\"s\":\"en\",\"l\":\"ja\"}"
        );
    }

    #[test]
    fn max_tokens_is_clamped() {
        assert_eq!(estimate_max_tokens(""), 64);
        assert_eq!(estimate_max_tokens(&"a".repeat(10_000)), 384);
    }

    #[test]
    fn escapes_control_characters() {
        assert_eq!(escape_json_string("a\u{1}b\nc"), "a\\u0001b\\nc");
    }

    #[test]
    fn retry_after_saturates_on_huge_values() {
        use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_ms(&headers), 0);

        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 3 "));
        assert_eq!(retry_after_ms(&headers), 3000);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("18446744073709552"));
        assert_eq!(retry_after_ms(&headers), u64::MAX);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after_ms(&headers), 0);
    }
}
