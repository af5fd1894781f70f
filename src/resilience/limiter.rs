//! Sliding-window rate limiter for the text backend.
//!
//! Keeps the timestamps of recent calls in a queue. A caller that would push
//! the count within the trailing window to `max_requests` sleeps until the
//! oldest call leaves the window, plus a small margin, then re-checks.
//!
//! The mutex covers prune → decide → append as one step and is released
//! before sleeping. A sleeper re-runs the decision after waking, so callers
//! sharing one limiter across tasks or threads never exceed the cap.

use crate::config::StorybookConfig;
use crate::error::StorybookError;
use crate::progress::ProgressCallback;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Enforces at most `max_requests` calls within any trailing window.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    margin: Duration,
    calls: Mutex<VecDeque<Instant>>,
    progress: Option<ProgressCallback>,
}

impl RateLimiter {
    /// Default slack added after the computed wait.
    pub const DEFAULT_MARGIN: Duration = Duration::from_secs(1);

    /// Create a limiter. `max_requests` must be at least 1.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, StorybookError> {
        if max_requests == 0 {
            return Err(StorybookError::InvalidConfig(
                "rate limiter needs max_requests ≥ 1".into(),
            ));
        }
        if window.is_zero() {
            return Err(StorybookError::InvalidConfig(
                "rate limiter window must be non-zero".into(),
            ));
        }
        Ok(Self {
            max_requests: max_requests as usize,
            window,
            margin: Self::DEFAULT_MARGIN,
            calls: Mutex::new(VecDeque::with_capacity(max_requests as usize)),
            progress: None,
        })
    }

    /// Build from the config's rate settings and progress callback.
    pub fn from_config(config: &StorybookConfig) -> Result<Self, StorybookError> {
        let mut limiter = Self::new(config.max_requests_per_minute, config.rate_window())?
            .with_margin(Duration::from_secs(config.rate_margin_secs));
        limiter.progress = config.progress_callback.clone();
        Ok(limiter)
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Calls recorded within the current window.
    pub fn in_window(&self) -> usize {
        let mut calls = self.lock();
        prune(&mut calls, Instant::now(), self.window);
        calls.len()
    }

    /// Wait until one more call fits in the window, then record it.
    pub async fn wait_if_needed(&self) {
        loop {
            let wait = {
                let mut calls = self.lock();
                let now = Instant::now();
                prune(&mut calls, now, self.window);

                if calls.len() < self.max_requests {
                    calls.push_back(now);
                    debug!("Rate limiter: {}/{} in window", calls.len(), self.max_requests);
                    return;
                }

                match calls.front() {
                    Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            let total = wait + self.margin;
            info!(
                "Rate limit reached ({} per {}s). Waiting {:.1}s",
                self.max_requests,
                self.window.as_secs(),
                total.as_secs_f64()
            );
            if let Some(ref cb) = self.progress {
                cb.on_rate_limit_wait(total);
            }
            sleep(total).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        // A panic while holding the guard cannot leave the queue half-updated.
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drop timestamps that are at least `window` old.
fn prune(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = calls.front() {
        if now.saturating_duration_since(front) >= window {
            calls.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::advance;

    const WINDOW: Duration = Duration::from_secs(60);
    // Paused-clock timers resolve to the millisecond.
    const TIMER_SLACK: Duration = Duration::from_millis(5);

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(
            RateLimiter::new(0, WINDOW),
            Err(StorybookError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_window_rejected() {
        assert!(RateLimiter::new(5, Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn calls_up_to_capacity_do_not_block() {
        let limiter = RateLimiter::new(15, WINDOW).unwrap();
        let start = Instant::now();
        for _ in 0..15 {
            limiter.wait_if_needed().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn sixteenth_call_waits_for_oldest_to_leave_window() {
        let limiter = RateLimiter::new(15, WINDOW).unwrap();
        let first = Instant::now();

        // 15 calls spread over 1.5 s, the 16th arrives inside 2 s.
        for _ in 0..15 {
            limiter.wait_if_needed().await;
            advance(Duration::from_millis(100)).await;
        }
        assert!(first.elapsed() < Duration::from_secs(2));

        limiter.wait_if_needed().await;
        let waited = first.elapsed();
        assert!(
            waited >= Duration::from_secs(58) && waited <= Duration::from_secs(61) + TIMER_SLACK,
            "16th call proceeded {waited:?} after the first"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn old_calls_are_pruned() {
        let limiter = RateLimiter::new(2, WINDOW).unwrap();
        limiter.wait_if_needed().await;
        limiter.wait_if_needed().await;
        assert_eq!(limiter.in_window(), 2);

        advance(WINDOW).await;
        assert_eq!(limiter.in_window(), 0);

        let before = Instant::now();
        limiter.wait_if_needed().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_limiter_never_exceeds_cap() {
        let limiter = Arc::new(RateLimiter::new(3, WINDOW).unwrap());
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..7 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.wait_if_needed().await;
                Instant::now()
            }));
        }

        let mut finished = Vec::new();
        for h in handles {
            finished.push(h.await.unwrap().duration_since(start));
        }
        finished.sort();

        // Any 60 s span holds at most three admissions.
        for (i, t) in finished.iter().enumerate() {
            let in_span = finished[i..]
                .iter()
                .filter(|u| **u < *t + WINDOW)
                .count();
            assert!(in_span <= 3, "window starting at {t:?} admitted {in_span}");
        }
        assert_eq!(finished[0], Duration::ZERO);
        assert!(finished[3] >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_wait_to_progress_callback() {
        use crate::progress::PipelineProgressCallback;
        use std::sync::atomic::{AtomicU64, Ordering};

        struct Recorder(AtomicU64);
        impl PipelineProgressCallback for Recorder {
            fn on_rate_limit_wait(&self, wait: Duration) {
                self.0.store(wait.as_millis() as u64, Ordering::SeqCst);
            }
        }

        let rec = Arc::new(Recorder(AtomicU64::new(0)));
        let limiter = RateLimiter::new(1, WINDOW)
            .unwrap()
            .with_progress(rec.clone());
        limiter.wait_if_needed().await;
        limiter.wait_if_needed().await;
        assert_eq!(rec.0.load(Ordering::SeqCst), 61_000);
    }
}
