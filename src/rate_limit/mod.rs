//! Fixed-window request rate limiting.
//!
//! Flow Overview:
//! 1) Derive a key per policy and client (`rate_limit:<ip>`, `rate_limit:auth:<ip>`).
//! 2) `INCR` the key in the counter store; the first increment of a window arms
//!    the key's expiry to the window length.
//! 3) Allow the request while the post-increment count is within the policy.
//!
//! Windows are fixed, not sliding: the counter store drops the key when the
//! window ends and the next request starts a fresh one.
//!
//! Failure policy: the limiter **fails open**. When the counter store errors or
//! times out the request is allowed and the failure is logged. Throttling is
//! not an authentication boundary; availability wins.

mod counter;
mod limiter;
mod redis;

pub use counter::{CounterStore, MemoryCounterStore};
pub use limiter::{RateLimitInfo, RateLimitOutcome, RateLimiter};
pub use redis::RedisCounterStore;

use std::time::Duration;

pub const DEFAULT_KEY_PREFIX: &str = "rate_limit";
pub const AUTH_KEY_PREFIX: &str = "rate_limit:auth";

const DEFAULT_API_WINDOW: Duration = Duration::from_secs(15 * 60);
const DEFAULT_API_MAX_REQUESTS: u32 = 100;
const DEFAULT_AUTH_WINDOW: Duration = Duration::from_secs(15 * 60);
const DEFAULT_AUTH_MAX_REQUESTS: u32 = 5;

/// A named limit: key prefix, window length and request budget per window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    prefix: String,
    window: Duration,
    max_requests: u32,
}

impl RateLimitPolicy {
    #[must_use]
    pub fn new(prefix: impl Into<String>, window: Duration, max_requests: u32) -> Self {
        Self {
            prefix: prefix.into(),
            window,
            max_requests,
        }
    }

    /// General API traffic: 100 requests per 15 minutes.
    #[must_use]
    pub fn api() -> Self {
        Self::new(DEFAULT_KEY_PREFIX, DEFAULT_API_WINDOW, DEFAULT_API_MAX_REQUESTS)
    }

    /// Authentication attempts: 5 requests per 15 minutes.
    #[must_use]
    pub fn auth() -> Self {
        Self::new(AUTH_KEY_PREFIX, DEFAULT_AUTH_WINDOW, DEFAULT_AUTH_MAX_REQUESTS)
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Counter key for a client identifier under this policy.
    #[must_use]
    pub fn key(&self, client: &str) -> String {
        format!("{}:{client}", self.prefix)
    }
}
