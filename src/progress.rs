//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::StorybookConfigBuilder::progress_callback`] to receive
//! events as the story stages run, as the retry core schedules backoff
//! waits, and as each rendering backend is tried.
//!
//! The three families of events map to the three messages a user needs:
//! *retry in progress* ([`on_retry_scheduled`](PipelineProgressCallback::on_retry_scheduled),
//! [`on_rate_limit_wait`](PipelineProgressCallback::on_rate_limit_wait)),
//! *stage done or failed* (the `on_stage_*` methods), and *degraded output
//! produced* ([`on_degraded`](PipelineProgressCallback::on_degraded)).
//!
//! # Example
//!
//! ```rust
//! use storybook_forge::{PipelineProgressCallback, StorybookConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//! use std::time::Duration;
//!
//! struct WaitCounter {
//!     waits: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for WaitCounter {
//!     fn on_rate_limit_wait(&self, wait: Duration) {
//!         self.waits.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("rate limit reached, waiting {:.1}s", wait.as_secs_f64());
//!     }
//! }
//!
//! let config = StorybookConfig::builder()
//!     .progress_callback(Arc::new(WaitCounter { waits: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::ErrorKind;
use crate::output::{ConversionAttemptResult, Stage};
use std::sync::Arc;
use std::time::Duration;

/// Called by the library as work progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`; the rate
/// limiter may be shared between threads.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called when a story stage begins.
    ///
    /// # Arguments
    /// * `stage` — which of the five stages
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finishes.
    ///
    /// # Arguments
    /// * `stage`      — which stage
    /// * `output_len` — byte length of the stage output
    fn on_stage_complete(&self, stage: Stage, output_len: usize) {
        let _ = (stage, output_len);
    }

    /// Called when a stage fails terminally.
    fn on_stage_error(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }

    /// Called before the retry core sleeps between attempts.
    ///
    /// # Arguments
    /// * `kind`         — classification of the failure being retried
    /// * `attempt`      — 1-indexed attempt that just failed
    /// * `max_attempts` — attempt cap
    /// * `wait`         — how long the caller will sleep
    fn on_retry_scheduled(&self, kind: ErrorKind, attempt: u32, max_attempts: u32, wait: Duration) {
        let _ = (kind, attempt, max_attempts, wait);
    }

    /// Called before the rate limiter sleeps because the window is full.
    fn on_rate_limit_wait(&self, wait: Duration) {
        let _ = wait;
    }

    /// Called just before a rendering backend is tried.
    fn on_backend_attempt(&self, backend: &str) {
        let _ = backend;
    }

    /// Called with the outcome of each rendering backend attempt.
    fn on_backend_result(&self, result: &ConversionAttemptResult) {
        let _ = result;
    }

    /// Called when output was produced in degraded form (placeholder image,
    /// HTML fallback instead of PDF).
    fn on_degraded(&self, message: &str) {
        let _ = message;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::StorybookConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
