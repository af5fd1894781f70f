//! Quota-aware retry around a single logical text call.
//!
//! Two backoff tracks feed the wait before an attempt:
//!
//! * **Floor**: after `n` consecutive quota failures (counted across calls,
//!   reset by any success) the next attempt never starts before
//!   `base_delay * 2^(n-1)` has passed since the last failure.
//! * **Per-call**: after a quota failure on attempt `a` (0-indexed, reset per
//!   `invoke`) the caller sleeps `max(hint or default_quota_delay,
//!   base_delay * 2^a)`. Timeouts and transient errors sleep
//!   `timeout_step * (a + 1)`.
//!
//! The effective wait is whichever is longer.

use crate::client::text::{TextBackend, TextRequest, TextResponse};
use crate::config::StorybookConfig;
use crate::error::{BackendError, ErrorKind, StorybookError};
use crate::progress::ProgressCallback;
use crate::resilience::limiter::RateLimiter;
use crate::resilience::usage::UsageTracker;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Attempt cap and backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub default_quota_delay: Duration,
    pub timeout_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            default_quota_delay: Duration::from_secs(60),
            timeout_step: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &StorybookConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_secs(config.base_delay_secs),
            default_quota_delay: Duration::from_secs(config.default_quota_delay_secs),
            timeout_step: Duration::from_secs(config.timeout_step_secs),
        }
    }

    /// `base_delay * 2^exp`, saturating.
    fn exponential(&self, exp: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(exp))
    }

    fn quota_wait(&self, attempt: u32, hint: Option<u64>) -> Duration {
        let hinted = hint
            .map(Duration::from_secs)
            .unwrap_or(self.default_quota_delay);
        hinted.max(self.exponential(attempt))
    }

    fn linear_wait(&self, attempt: u32) -> Duration {
        self.timeout_step.saturating_mul(attempt + 1)
    }

    /// Minimum gap after `consecutive_failures` quota failures.
    fn floor(&self, consecutive_failures: u32) -> Duration {
        match consecutive_failures {
            0 => Duration::ZERO,
            n => self.exponential(n - 1),
        }
    }
}

/// Quota failure history shared by every call through one caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureState {
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
}

/// Wraps a [`TextBackend`] with rate limiting and classified retry.
pub struct ResilientCaller<B> {
    backend: B,
    limiter: Arc<RateLimiter>,
    usage: Arc<UsageTracker>,
    policy: RetryPolicy,
    state: Mutex<FailureState>,
    progress: Option<ProgressCallback>,
}

impl<B: TextBackend> ResilientCaller<B> {
    pub fn new(
        backend: B,
        limiter: Arc<RateLimiter>,
        usage: Arc<UsageTracker>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            limiter,
            usage,
            policy,
            state: Mutex::new(FailureState::default()),
            progress: None,
        }
    }

    /// Build with the config's retry policy and progress callback.
    pub fn from_config(
        backend: B,
        config: &StorybookConfig,
        limiter: Arc<RateLimiter>,
        usage: Arc<UsageTracker>,
    ) -> Self {
        let mut caller = Self::new(backend, limiter, usage, RetryPolicy::from_config(config));
        caller.progress = config.progress_callback.clone();
        caller
    }

    pub fn with_progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// Snapshot of the current failure history.
    pub fn failure_state(&self) -> FailureState {
        *self.lock()
    }

    /// Issue `request`, retrying quota, timeout and transient failures.
    pub async fn invoke(&self, request: &TextRequest) -> Result<TextResponse, StorybookError> {
        let max = self.policy.max_attempts;

        for attempt in 0..max {
            self.wait_for_floor().await;
            self.limiter.wait_if_needed().await;
            self.usage.track_request();

            let err = match self.backend.generate(request).await {
                Ok(response) => {
                    *self.lock() = FailureState::default();
                    if attempt > 0 {
                        info!("Text call succeeded on attempt {}/{}", attempt + 1, max);
                    }
                    return Ok(response);
                }
                Err(e) => e,
            };

            let is_last = attempt + 1 == max;
            let wait = match err.kind() {
                ErrorKind::RateLimited => {
                    let failures = self.record_quota_failure();
                    if is_last {
                        error!("Quota exceeded after {max} attempts ({failures} consecutive)");
                        return Err(StorybookError::QuotaExceeded {
                            attempts: max,
                            retry_after_secs: err.retry_after_secs(),
                        });
                    }
                    self.policy.quota_wait(attempt, err.retry_after_secs())
                }
                ErrorKind::Timeout | ErrorKind::Transient => {
                    if is_last {
                        return Err(terminal(err, max));
                    }
                    self.policy.linear_wait(attempt)
                }
                ErrorKind::Permanent => {
                    error!("Text call failed permanently: {err}");
                    return Err(StorybookError::Backend(err));
                }
            };

            warn!(
                "{err} (attempt {}/{max}); retrying in {}s",
                attempt + 1,
                wait.as_secs()
            );
            if let Some(ref cb) = self.progress {
                cb.on_retry_scheduled(err.kind(), attempt + 1, max, wait);
            }
            sleep(wait).await;
        }

        // max_attempts ≥ 1, so the loop always returns.
        Err(StorybookError::Internal("retry loop ran zero attempts".into()))
    }

    async fn wait_for_floor(&self) {
        let remaining = {
            let state = self.lock();
            match state.last_failure {
                Some(at) if state.consecutive_failures > 0 => self
                    .policy
                    .floor(state.consecutive_failures)
                    .saturating_sub(at.elapsed()),
                _ => Duration::ZERO,
            }
        };
        if !remaining.is_zero() {
            debug!("Backoff floor: sleeping {:.1}s", remaining.as_secs_f64());
            sleep(remaining).await;
        }
    }

    fn record_quota_failure(&self) -> u32 {
        let mut state = self.lock();
        state.consecutive_failures += 1;
        state.last_failure = Some(Instant::now());
        state.consecutive_failures
    }

    fn lock(&self) -> MutexGuard<'_, FailureState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn terminal(err: BackendError, attempts: u32) -> StorybookError {
    match err {
        BackendError::Timeout { .. } => StorybookError::ApiTimeout { attempts },
        other => StorybookError::RetriesExhausted {
            attempts,
            detail: other.to_string(),
        },
    }
}
