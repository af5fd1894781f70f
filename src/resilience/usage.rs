//! Daily request accounting.
//!
//! An explicit context object: construct one per process and hand an `Arc`
//! to whatever issues requests. Counts reset when the UTC day changes.

use crate::resilience::limiter::RateLimiter;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Daily volume above which a warning is logged (free tier allows ~1500).
pub const HIGH_USAGE_THRESHOLD: u64 = 1200;

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug)]
struct Counter {
    day: u64,
    requests: u64,
}

/// Counts text-backend requests per UTC day.
#[derive(Debug)]
pub struct UsageTracker {
    counter: Mutex<Counter>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            counter: Mutex::new(Counter {
                day: current_day(),
                requests: 0,
            }),
        }
    }

    /// Record one request and return today's total.
    pub fn track_request(&self) -> u64 {
        self.track_request_on(current_day())
    }

    fn track_request_on(&self, day: u64) -> u64 {
        let mut c = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        if c.day != day {
            c.day = day;
            c.requests = 0;
        }
        c.requests += 1;
        if c.requests > HIGH_USAGE_THRESHOLD {
            warn!("High API usage today: {} requests", c.requests);
        }
        c.requests
    }

    pub fn requests_today(&self) -> u64 {
        let c = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        if c.day == current_day() {
            c.requests
        } else {
            0
        }
    }
}

fn current_day() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() / SECS_PER_DAY)
        .unwrap_or(0)
}

/// Snapshot of API usage for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApiStatus {
    pub requests_today: u64,
    pub requests_in_window: usize,
    pub max_requests_per_minute: usize,
}

impl ApiStatus {
    pub fn capture(tracker: &UsageTracker, limiter: &RateLimiter) -> Self {
        Self {
            requests_today: tracker.requests_today(),
            requests_in_window: limiter.in_window(),
            max_requests_per_minute: limiter.max_requests(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counts_requests() {
        let t = UsageTracker::new();
        assert_eq!(t.requests_today(), 0);
        assert_eq!(t.track_request(), 1);
        assert_eq!(t.track_request(), 2);
        assert_eq!(t.requests_today(), 2);
    }

    #[test]
    fn resets_on_new_day() {
        let t = UsageTracker::new();
        let today = current_day();
        t.track_request_on(today);
        t.track_request_on(today);
        assert_eq!(t.track_request_on(today + 1), 1);
    }

    #[tokio::test]
    async fn status_combines_tracker_and_limiter() {
        let t = UsageTracker::new();
        let l = RateLimiter::new(15, Duration::from_secs(60)).unwrap();
        l.wait_if_needed().await;
        t.track_request();

        let s = ApiStatus::capture(&t, &l);
        assert_eq!(s.requests_today, 1);
        assert_eq!(s.requests_in_window, 1);
        assert_eq!(s.max_requests_per_minute, 15);
    }
}
