//! Text-generation backend: the capability the retry core needs, and the
//! Gemini REST adapter that provides it.
//!
//! [`TextBackend`] is the single call the retry core makes: a prompt in,
//! text or a classified error out.
//!
//! ## Classification
//!
//! | Signal | Kind |
//! |--------|------|
//! | HTTP 429, `RESOURCE_EXHAUSTED` | `RateLimited` (+ `RetryInfo.retryDelay` / `Retry-After` hint) |
//! | transport timeout, HTTP 408 / 504, `DEADLINE_EXCEEDED` | `Timeout` |
//! | HTTP 500 / 502 / 503, `UNAVAILABLE`, connection refused | `Transient` |
//! | anything else, empty candidates | `Permanent` |

use crate::config::{GenerationParams, StorybookConfig, GOOGLE_API_KEY_VAR};
use crate::error::{BackendError, StorybookError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A prompt plus sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRequest {
    pub prompt: String,
    pub params: GenerationParams,
}

impl TextRequest {
    pub fn new(prompt: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            prompt: prompt.into(),
            params,
        }
    }
}

/// Generated text and token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextResponse {
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// Anything that can turn a prompt into text.
#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn generate(&self, request: &TextRequest) -> Result<TextResponse, BackendError>;
}

#[async_trait]
impl<T: TextBackend + ?Sized> TextBackend for Arc<T> {
    async fn generate(&self, request: &TextRequest) -> Result<TextResponse, BackendError> {
        (**self).generate(request).await
    }
}

// ── Gemini adapter ───────────────────────────────────────────────────────

/// Calls `models/{model}:generateContent`.
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: &str,
        api_base: &str,
        timeout_secs: u64,
    ) -> Result<Self, StorybookError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StorybookError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/models/{}:generateContent",
                api_base.trim_end_matches('/'),
                model
            ),
            api_key: api_key.into(),
        })
    }

    /// Build from config; a missing key is a configuration error here.
    pub fn from_config(config: &StorybookConfig) -> Result<Self, StorybookError> {
        let key = config.google_api_key.as_deref().ok_or_else(|| {
            StorybookError::InvalidConfig(format!("{GOOGLE_API_KEY_VAR} is not set"))
        })?;
        Self::new(
            key,
            &config.text_model,
            &config.text_api_base,
            config.text_timeout_secs,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TextBackend for GeminiClient {
    async fn generate(&self, request: &TextRequest) -> Result<TextResponse, BackendError> {
        let body = GenerateContentRequest::from(request);

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::from_transport(&e))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::from_transport(&e))?;

        if !(200..300).contains(&status) {
            return Err(classify_failure(status, &text, retry_after));
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::Permanent {
                status: Some(status),
                detail: format!("unparseable response: {e}"),
            })?;
        let out = parsed.into_text_response()?;
        debug!(
            "Gemini: {} prompt tokens, {} completion tokens",
            out.prompt_tokens, out.completion_tokens
        );
        Ok(out)
    }
}

/// Map a non-2xx response into the error taxonomy.
pub fn classify_failure(status: u16, body: &str, retry_after: Option<u64>) -> BackendError {
    let envelope: Option<ErrorEnvelope> = serde_json::from_str(body).ok();
    let (rpc_status, message, hint) = match envelope {
        Some(env) => {
            let hint = env.error.retry_delay_secs();
            (env.error.status, env.error.message, hint)
        }
        None => (None, truncate(body, 300), None),
    };
    let rpc = rpc_status.as_deref().unwrap_or("");
    let detail = if message.is_empty() {
        format!("HTTP {status}")
    } else {
        message
    };

    match (status, rpc) {
        (429, _) | (_, "RESOURCE_EXHAUSTED") => BackendError::RateLimited {
            retry_after_secs: retry_after.or(hint),
            detail,
        },
        (408 | 504, _) | (_, "DEADLINE_EXCEEDED") => BackendError::Timeout { detail },
        (500 | 502 | 503, _) | (_, "UNAVAILABLE") => BackendError::Transient {
            status: Some(status),
            detail,
        },
        _ => BackendError::Permanent {
            status: Some(status),
            detail,
        },
    }
}

/// Parse a protobuf duration string such as `"37s"` or `"1.5s"`, rounding up.
fn parse_duration_secs(s: &str) -> Option<u64> {
    let n: f64 = s.trim().strip_suffix('s')?.parse().ok()?;
    (n.is_finite() && n >= 0.0).then(|| n.ceil() as u64)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<PartOut<'a>>,
}

#[derive(Debug, Serialize)]
struct PartOut<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
}

impl<'a> From<&'a TextRequest> for GenerateContentRequest<'a> {
    fn from(r: &'a TextRequest) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![PartOut { text: &r.prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: r.params.temperature,
                max_output_tokens: r.params.max_output_tokens,
                top_p: r.params.top_p,
                top_k: r.params.top_k,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartIn>,
}

#[derive(Debug, Deserialize)]
struct PartIn {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
}

impl GenerateContentResponse {
    fn into_text_response(self) -> Result<TextResponse, BackendError> {
        let candidate = self.candidates.into_iter().next();
        let finish = candidate
            .as_ref()
            .and_then(|c| c.finish_reason.clone())
            .unwrap_or_default();
        let text: String = candidate
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(BackendError::Permanent {
                status: Some(200),
                detail: format!("empty response (finish reason: {finish:?})"),
            });
        }

        let usage = self.usage_metadata;
        Ok(TextResponse {
            text,
            prompt_tokens: usage.as_ref().map_or(0, |u| u.prompt_token_count),
            completion_tokens: usage.as_ref().map_or(0, |u| u.candidates_token_count),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: RpcError,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

impl RpcError {
    /// `retryDelay` from a `google.rpc.RetryInfo` detail, if present.
    fn retry_delay_secs(&self) -> Option<u64> {
        self.details
            .iter()
            .filter_map(|d| d.get("retryDelay").and_then(|v| v.as_str()))
            .find_map(parse_duration_secs)
    }
}
