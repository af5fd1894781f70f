//! Configuration types for storybook generation and document conversion.
//!
//! All behaviour is controlled through [`StorybookConfig`], built via its
//! [`StorybookConfigBuilder`]. The defaults reproduce the limits a free-tier
//! Gemini key tolerates: 15 calls per trailing minute, five attempts per
//! logical call, 30 s base backoff.
//!
//! Credentials are read from the environment by
//! [`StorybookConfig::from_env`]. Missing keys are *not* an error at build
//! time; [`StorybookConfig::validate_credentials`] reports them as a list of
//! [`ConfigIssue`]s so a CLI can print every problem at once.

use crate::error::StorybookError;
use crate::progress::ProgressCallback;
use crate::resilience::usage::HIGH_USAGE_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the text-generation (Gemini) key.
pub const GOOGLE_API_KEY_VAR: &str = "GOOGLE_API_KEY";
/// Environment variable holding the image-generation (Hugging Face) key.
pub const HUGGINGFACE_API_KEY_VAR: &str = "HUGGINGFACE_API_KEY";

/// Default Gemini REST endpoint root.
pub const DEFAULT_TEXT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Default text model.
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash-exp";
/// Default image inference endpoint (FLUX.1-dev on Hugging Face).
pub const DEFAULT_IMAGE_API_URL: &str =
    "https://api-inference.huggingface.co/models/black-forest-labs/FLUX.1-dev";

/// Configuration for a storybook run.
///
/// # Example
/// ```rust
/// use storybook_forge::StorybookConfig;
///
/// let config = StorybookConfig::builder()
///     .max_requests_per_minute(10)
///     .output_dir("out")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_requests_per_minute, 10);
/// ```
#[derive(Clone)]
pub struct StorybookConfig {
    /// Key for the text backend. `None` when unset or empty.
    pub google_api_key: Option<String>,

    /// Key for the image backend. `None` when unset or empty.
    pub huggingface_api_key: Option<String>,

    /// Text model id. Default: `gemini-2.0-flash-exp`.
    pub text_model: String,

    /// Root of the text REST API (the model path is appended).
    pub text_api_base: String,

    /// Full URL of the image inference endpoint.
    pub image_api_url: String,

    /// Cap on text calls within any trailing window. Default: 15.
    pub max_requests_per_minute: u32,

    /// Sliding-window length in seconds. Default: 60.
    pub rate_window_secs: u64,

    /// Extra sleep added once the window is full. Default: 1.
    pub rate_margin_secs: u64,

    /// Attempts per logical text call, first try included. Default: 5.
    pub max_attempts: u32,

    /// Base of the exponential quota backoff in seconds. Default: 30.
    ///
    /// The wait before the next attempt after `n` consecutive quota failures
    /// is at least `base_delay_secs * 2^(n-1)`.
    pub base_delay_secs: u64,

    /// Quota delay used when the provider supplies no hint. Default: 60.
    pub default_quota_delay_secs: u64,

    /// Linear backoff step for timeouts: `step * (attempt + 1)`. Default: 10.
    pub timeout_step_secs: u64,

    /// Per-request timeout for the text backend. Default: 60.
    pub text_timeout_secs: u64,

    /// Per-request timeout for the image backend. Default: 60.
    pub image_timeout_secs: u64,

    /// Sampling parameters sent with every text request.
    pub generation: GenerationParams,

    /// Fixed parameters sent with every image request.
    pub image: ImageParams,

    /// Where `story.md`, images and rendered outputs are written. Default: `.`.
    pub output_dir: PathBuf,

    /// File name of the assembled Markdown story. Default: `story.md`.
    pub output_markdown: String,

    /// Rendered PDFs of this size or smaller are treated as failed. Default: 1000.
    pub min_pdf_bytes: u64,

    /// Number of chapters requested from the writer. Default: 5.
    pub chapter_count: usize,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for StorybookConfig {
    fn default() -> Self {
        Self {
            google_api_key: None,
            huggingface_api_key: None,
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            text_api_base: DEFAULT_TEXT_API_BASE.to_string(),
            image_api_url: DEFAULT_IMAGE_API_URL.to_string(),
            max_requests_per_minute: 15,
            rate_window_secs: 60,
            rate_margin_secs: 1,
            max_attempts: 5,
            base_delay_secs: 30,
            default_quota_delay_secs: 60,
            timeout_step_secs: 10,
            text_timeout_secs: 60,
            image_timeout_secs: 60,
            generation: GenerationParams::default(),
            image: ImageParams::default(),
            output_dir: PathBuf::from("."),
            output_markdown: "story.md".to_string(),
            min_pdf_bytes: 1000,
            chapter_count: 5,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for StorybookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorybookConfig")
            .field("google_api_key", &self.google_api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "huggingface_api_key",
                &self.huggingface_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("text_model", &self.text_model)
            .field("max_requests_per_minute", &self.max_requests_per_minute)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_secs", &self.base_delay_secs)
            .field("generation", &self.generation)
            .field("image", &self.image)
            .field("output_dir", &self.output_dir)
            .field("min_pdf_bytes", &self.min_pdf_bytes)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl StorybookConfig {
    /// Create a new builder for `StorybookConfig`.
    pub fn builder() -> StorybookConfigBuilder {
        StorybookConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults plus credentials read from the process environment.
    pub fn from_env() -> Self {
        Self {
            google_api_key: non_empty_env(GOOGLE_API_KEY_VAR),
            huggingface_api_key: non_empty_env(HUGGINGFACE_API_KEY_VAR),
            ..Self::default()
        }
    }

    /// Report every missing credential. An empty list means the config is usable.
    pub fn validate_credentials(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.google_api_key.is_none() {
            issues.push(ConfigIssue::missing(GOOGLE_API_KEY_VAR));
        }
        if self.huggingface_api_key.is_none() {
            issues.push(ConfigIssue::missing(HUGGINGFACE_API_KEY_VAR));
        }
        issues
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    /// Path of the assembled Markdown story.
    pub fn markdown_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_markdown)
    }

    /// Human-readable summary of the request limits, shown before a run.
    pub fn rate_limit_summary(&self) -> String {
        format!(
            "Text API: {} requests per {}s window\n\
Retries: up to {} attempts, quota backoff from {}s doubling per failure \
({}s when the provider gives no hint)\n\
Daily usage warning above {} requests",
            self.max_requests_per_minute,
            self.rate_window_secs,
            self.max_attempts,
            self.base_delay_secs,
            self.default_quota_delay_secs,
            HIGH_USAGE_THRESHOLD,
        )
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Builder for [`StorybookConfig`].
#[derive(Debug)]
pub struct StorybookConfigBuilder {
    config: StorybookConfig,
}

impl StorybookConfigBuilder {
    /// Start from the environment instead of the bare defaults.
    pub fn from_env() -> Self {
        Self {
            config: StorybookConfig::from_env(),
        }
    }

    pub fn google_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.google_api_key = Some(key.into()).filter(|k: &String| !k.is_empty());
        self
    }

    pub fn huggingface_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.huggingface_api_key = Some(key.into()).filter(|k: &String| !k.is_empty());
        self
    }

    pub fn text_model(mut self, model: impl Into<String>) -> Self {
        self.config.text_model = model.into();
        self
    }

    pub fn text_api_base(mut self, url: impl Into<String>) -> Self {
        self.config.text_api_base = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn image_api_url(mut self, url: impl Into<String>) -> Self {
        self.config.image_api_url = url.into();
        self
    }

    pub fn max_requests_per_minute(mut self, n: u32) -> Self {
        self.config.max_requests_per_minute = n;
        self
    }

    pub fn rate_window_secs(mut self, secs: u64) -> Self {
        self.config.rate_window_secs = secs.max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn base_delay_secs(mut self, secs: u64) -> Self {
        self.config.base_delay_secs = secs;
        self
    }

    pub fn default_quota_delay_secs(mut self, secs: u64) -> Self {
        self.config.default_quota_delay_secs = secs;
        self
    }

    pub fn timeout_step_secs(mut self, secs: u64) -> Self {
        self.config.timeout_step_secs = secs;
        self
    }

    pub fn text_timeout_secs(mut self, secs: u64) -> Self {
        self.config.text_timeout_secs = secs.max(1);
        self
    }

    pub fn image_timeout_secs(mut self, secs: u64) -> Self {
        self.config.image_timeout_secs = secs.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.generation.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.generation.max_output_tokens = n.max(1);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn output_markdown(mut self, name: impl Into<String>) -> Self {
        self.config.output_markdown = name.into();
        self
    }

    pub fn min_pdf_bytes(mut self, n: u64) -> Self {
        self.config.min_pdf_bytes = n;
        self
    }

    pub fn chapter_count(mut self, n: usize) -> Self {
        self.config.chapter_count = n;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<StorybookConfig, StorybookError> {
        let c = &self.config;
        if c.max_requests_per_minute == 0 {
            return Err(StorybookError::InvalidConfig(
                "max_requests_per_minute must be ≥ 1".into(),
            ));
        }
        if c.max_attempts == 0 {
            return Err(StorybookError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.chapter_count == 0 {
            return Err(StorybookError::InvalidConfig(
                "chapter_count must be ≥ 1".into(),
            ));
        }
        if c.output_markdown.trim().is_empty() {
            return Err(StorybookError::InvalidConfig(
                "output_markdown must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Parameter blocks ─────────────────────────────────────────────────────

/// Sampling parameters for the text backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 2048,
            top_p: 0.9,
            top_k: 40,
        }
    }
}

/// Fixed generation parameters for the image backend.
///
/// Serialises directly as the `parameters` object of the inference request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageParams {
    pub guidance_scale: f32,
    pub num_inference_steps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            guidance_scale: 7.5,
            num_inference_steps: 50,
            width: 1024,
            height: 1024,
        }
    }
}

// ── Validation ───────────────────────────────────────────────────────────

/// A single startup problem, e.g. a missing credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    /// The environment variable concerned.
    pub variable: String,
    pub message: String,
}

impl ConfigIssue {
    fn missing(variable: &str) -> Self {
        Self {
            variable: variable.to_string(),
            message: format!("{variable} environment variable not set"),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
