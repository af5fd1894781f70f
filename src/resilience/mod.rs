//! Rate limiting, retry and usage accounting for the text backend.
//!
//! ```text
//!   ResilientCaller::invoke
//!     ├─ backoff floor (FailureState)
//!     ├─ RateLimiter::wait_if_needed
//!     ├─ UsageTracker::track_request
//!     └─ TextBackend::generate ── classify ── retry / surface
//! ```

pub mod limiter;
pub mod retry;
pub mod usage;

pub use limiter::RateLimiter;
pub use retry::{FailureState, ResilientCaller, RetryPolicy};
pub use usage::{ApiStatus, UsageTracker};
