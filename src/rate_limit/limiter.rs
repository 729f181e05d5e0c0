use super::{RateLimitPolicy, counter::CounterStore};
use crate::store::{self, DEFAULT_STORE_TIMEOUT, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of counting one request against a window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl RateLimitOutcome {
    fn unrestricted(limit: u32, window: Duration) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: reset_at(window),
            retry_after_seconds: None,
        }
    }
}

/// Read-only view of a counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub count: u32,
    pub remaining: u32,
    pub reset_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    timeout: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Count a request for `client` under `policy`.
    pub async fn check_policy(&self, policy: &RateLimitPolicy, client: &str) -> RateLimitOutcome {
        self.check(&policy.key(client), policy.window(), policy.max_requests())
            .await
    }

    /// Count one request against `key` and decide whether it may proceed.
    ///
    /// A zero `window` disables limiting for the call and leaves the store
    /// untouched. Store failures allow the request.
    pub async fn check(&self, key: &str, window: Duration, max_requests: u32) -> RateLimitOutcome {
        if window.is_zero() {
            return RateLimitOutcome::unrestricted(max_requests, window);
        }

        let count = match store::bounded("rate_limit.incr", self.timeout, self.store.incr(key)).await
        {
            Ok(count) => count,
            Err(err) => {
                warn!(key, "rate limiter failing open: {err}");
                return RateLimitOutcome::unrestricted(max_requests, window);
            }
        };

        let ttl = if count == 1 {
            self.arm_expiry(key, window).await;
            window
        } else {
            match store::bounded("rate_limit.ttl", self.timeout, self.store.ttl(key)).await {
                Ok(Some(ttl)) => ttl,
                Ok(None) => {
                    // Expiry lost between INCR and PEXPIRE; the key would never reset.
                    debug!(key, "counter without expiry, re-arming window");
                    self.arm_expiry(key, window).await;
                    window
                }
                Err(_) => window,
            }
        };

        let count = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
        let allowed = count <= max_requests;
        let retry_after_seconds = (!allowed).then(|| ceil_seconds(ttl).max(1));

        if !allowed {
            debug!(key, count, max_requests, "rate limit exceeded");
        }

        RateLimitOutcome {
            allowed,
            limit: max_requests,
            remaining: max_requests.saturating_sub(count),
            reset_at: reset_at(ttl),
            retry_after_seconds,
        }
    }

    /// Current count and reset time without counting a request.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the counter store fails or times out.
    pub async fn info(&self, key: &str, max_requests: u32) -> Result<RateLimitInfo, StoreError> {
        let count = store::bounded("rate_limit.get", self.timeout, self.store.get(key)).await?;
        let ttl = store::bounded("rate_limit.ttl", self.timeout, self.store.ttl(key)).await?;
        let count = count
            .map(|count| u32::try_from(count.max(0)).unwrap_or(u32::MAX))
            .unwrap_or(0);
        Ok(RateLimitInfo {
            count,
            remaining: max_requests.saturating_sub(count),
            reset_at: ttl.map(reset_at),
        })
    }

    /// Drop the counter so the next request starts a new window.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the counter store fails or times out.
    pub async fn reset(&self, key: &str) -> Result<(), StoreError> {
        store::bounded("rate_limit.delete", self.timeout, self.store.delete(key)).await
    }

    async fn arm_expiry(&self, key: &str, window: Duration) {
        // A failure here leaves the key without a TTL; the next request re-arms it.
        let _ = store::bounded(
            "rate_limit.expire",
            self.timeout,
            self.store.expire(key, window),
        )
        .await;
    }
}

fn reset_at(ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .unwrap_or_else(Utc::now)
}

fn ceil_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}
