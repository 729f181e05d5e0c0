//! Bounded calls to external stores.
//!
//! Every round trip to Redis or `PostgreSQL` goes through [`bounded`], which
//! applies a timeout and reports failures with the operation name and the
//! elapsed time. Callers decide what a failure means: the rate limiter fails
//! open, sessions and two-factor fail closed.
//!
//! Writes whose failure must never reach the caller (activity refresh, audit
//! trail) go through [`best_effort`] instead.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Default upper bound for a single store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("{operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl StoreError {
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Timeout { operation, .. } | Self::Backend { operation, .. } => operation,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Run a store operation under `timeout`.
///
/// # Errors
/// Returns [`StoreError::Timeout`] when the deadline passes and
/// [`StoreError::Backend`] when the operation itself fails.
pub async fn bounded<T, F>(operation: &'static str, timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let started = Instant::now();
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => {
            error!(
                operation,
                elapsed_ms = elapsed_ms(started),
                "store operation failed: {source:#}"
            );
            Err(StoreError::Backend { operation, source })
        }
        Err(_) => {
            error!(
                operation,
                elapsed_ms = elapsed_ms(started),
                "store operation timed out"
            );
            Err(StoreError::Timeout { operation, timeout })
        }
    }
}

/// Run a write whose outcome is advisory: failures are logged and dropped.
///
/// Returns `true` when the write completed.
pub async fn best_effort<F>(operation: &'static str, timeout: Duration, fut: F) -> bool
where
    F: Future<Output = anyhow::Result<()>>,
{
    let started = Instant::now();
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(
                operation,
                elapsed_ms = elapsed_ms(started),
                "best-effort write failed: {err:#}"
            );
            false
        }
        Err(_) => {
            warn!(
                operation,
                elapsed_ms = elapsed_ms(started),
                "best-effort write timed out"
            );
            false
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[tokio::test]
    async fn bounded_passes_value_through() {
        let value = bounded("test.ok", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(value.ok(), Some(7));
    }

    #[tokio::test]
    async fn bounded_wraps_backend_error_with_operation() {
        let result: Result<(), _> =
            bounded("test.fail", Duration::from_secs(1), async { Err(anyhow!("boom")) }).await;
        let err = result.err();
        assert!(matches!(err, Some(StoreError::Backend { operation: "test.fail", .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out() {
        let result: Result<(), _> = bounded("test.slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(result.is_err_and(|err| err.is_timeout() && err.operation() == "test.slow"));
    }

    #[tokio::test]
    async fn best_effort_swallows_errors() {
        assert!(best_effort("test.ok", Duration::from_secs(1), async { Ok(()) }).await);
        assert!(!best_effort("test.fail", Duration::from_secs(1), async { Err(anyhow!("nope")) }).await);
    }
}
