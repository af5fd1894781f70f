//! Error types for the storybook-forge library.
//!
//! Two distinct error types reflect two distinct layers:
//!
//! * [`BackendError`] — **Classified**: what a single remote call reported.
//!   Client adapters ([`crate::client`]) map raw transport failures and HTTP
//!   statuses into one of four kinds before anything else sees them, so the
//!   retry core in [`crate::resilience::retry`] decides on a typed
//!   [`ErrorKind`] and never inspects free text.
//!
//! * [`StorybookError`] — **Fatal**: the operation cannot proceed
//!   (quota exhausted after every attempt, permanent provider error, bad
//!   configuration). Returned as `Err(StorybookError)` from the top-level
//!   entry points.
//!
//! Image generation and document conversion never surface either type: both
//! degrade to a placeholder or a fallback artifact instead.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used by the retry core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// HTTP 429 or a provider quota signal.
    RateLimited,
    /// The request did not complete within its timeout.
    Timeout,
    /// Temporary unavailability (5xx); worth another try.
    Transient,
    /// Anything else. Never retried.
    Permanent,
}

/// A failed call to a remote backend, already classified.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// HTTP 429 / quota exhausted.
    ///
    /// `retry_after_secs` carries the provider-supplied delay hint when the
    /// response contained one.
    #[error("Rate limit or quota exceeded: {detail}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        detail: String,
    },

    /// The call timed out (transport timeout, 408 or 504).
    #[error("Request timed out: {detail}")]
    Timeout { detail: String },

    /// The backend is temporarily unavailable.
    #[error("Backend temporarily unavailable (HTTP {status:?}): {detail}")]
    Transient { status: Option<u16>, detail: String },

    /// Bad request, bad key, malformed response…
    #[error("Backend error (HTTP {status:?}): {detail}")]
    Permanent { status: Option<u16>, detail: String },
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::RateLimited { .. } => ErrorKind::RateLimited,
            BackendError::Timeout { .. } => ErrorKind::Timeout,
            BackendError::Transient { .. } => ErrorKind::Transient,
            BackendError::Permanent { .. } => ErrorKind::Permanent,
        }
    }

    /// Provider-supplied retry delay, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            BackendError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// Map a `reqwest` transport error (no HTTP response) to a kind.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout {
                detail: err.to_string(),
            }
        } else if err.is_connect() {
            BackendError::Transient {
                status: None,
                detail: err.to_string(),
            }
        } else {
            BackendError::Permanent {
                status: err.status().map(|s| s.as_u16()),
                detail: err.to_string(),
            }
        }
    }
}

/// Why a single rendering backend attempt failed.
///
/// Never fatal: the conversion pipeline records it and moves on to the next
/// backend.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The backend's executable could not be spawned.
    #[error("'{program}' is not installed or not on PATH")]
    NotInstalled { program: String },

    /// The backend ran and exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The backend reported success but the output is missing or too small.
    #[error("output '{path}' is {bytes} bytes, expected more than {min_bytes}")]
    OutputTooSmall {
        path: PathBuf,
        bytes: u64,
        min_bytes: u64,
    },

    /// Preparing temporary inputs failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// All fatal errors returned by the storybook-forge library.
#[derive(Debug, Error)]
pub enum StorybookError {
    // ── Remote call errors ───────────────────────────────────────────────
    /// Quota/rate errors persisted through every attempt.
    #[error(
        "Quota exceeded after {attempts} attempts.\n\
Check your API quota and billing, or wait for the quota window to reset."
    )]
    QuotaExceeded {
        attempts: u32,
        retry_after_secs: Option<u64>,
    },

    /// Every attempt timed out.
    #[error("Text generation timed out on all {attempts} attempts")]
    ApiTimeout { attempts: u32 },

    /// Transient backend errors persisted through every attempt.
    #[error("Backend still unavailable after {attempts} attempts: {detail}")]
    RetriesExhausted { attempts: u32, detail: String },

    /// The backend returned a non-retryable error.
    #[error("Text generation failed permanently: {0}")]
    Backend(#[source] BackendError),

    // ── Pipeline errors ──────────────────────────────────────────────────
    /// A story stage produced unusable output.
    #[error("Stage '{stage}' failed: {detail}")]
    StageFailed { stage: String, detail: String },

    /// Input document was not found at the given path.
    #[error("Document not found: '{path}'")]
    DocumentNotFound { path: PathBuf },

    /// Input document exists but could not be read.
    #[error("Cannot read document '{path}': {source}")]
    DocumentUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── I/O errors ───────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorybookError {
    /// `true` when the failure was caused by provider quota limits.
    pub fn is_quota(&self) -> bool {
        matches!(self, StorybookError::QuotaExceeded { .. })
    }

    /// Recovery steps for quota failures; `None` for every other error.
    pub fn recovery_guidance(&self) -> Option<String> {
        let StorybookError::QuotaExceeded {
            retry_after_secs, ..
        } = self
        else {
            return None;
        };

        let mut out = String::from("If quota errors keep happening:\n");
        match retry_after_secs {
            Some(secs) => out.push_str(&format!(
                "  1. Wait at least {secs}s (the provider's hint) or until the daily quota resets\n"
            )),
            None => out.push_str("  1. Wait for the quota window or billing cycle to reset\n"),
        }
        for line in [
            "  2. Check usage in the Google AI Studio dashboard",
            "  3. Consider upgrading your plan if the free tier is too small",
            "  4. Lower --requests-per-minute; retries already back off automatically",
            "",
            "Links:",
            "  Google AI Studio:   https://aistudio.google.com/",
            "  Gemini rate limits: https://ai.google.dev/gemini-api/docs/rate-limits",
        ] {
            out.push_str(line);
            out.push('\n');
        }
        Some(out)
    }
}
