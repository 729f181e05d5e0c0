//! Counter store abstraction and an in-process implementation.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Atomic counters with expiry (Redis semantics).
///
/// `incr` must be atomic across every process sharing the store; the limiter
/// holds no lock of its own.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter, creating it at 1 when absent. Returns the new value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set the time-to-live of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Remaining time-to-live; `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn get(&self, key: &str) -> Result<Option<i64>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug)]
struct Counter {
    count: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Single-process counter store for development and tests.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        counters.retain(|_, counter| !counter.is_expired(now));
        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: None,
        });
        counter.count += 1;
        Ok(counter.count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut counters = self.counters.lock().await;
        if let Some(counter) = counters.get_mut(key) {
            counter.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let counters = self.counters.lock().await;
        Ok(counters
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .and_then(|counter| counter.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let now = Instant::now();
        let counters = self.counters.lock().await;
        Ok(counters
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .map(|counter| counter.count))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.counters.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn memory_store_counts_and_expires() -> Result<()> {
        let store = MemoryCounterStore::new();
        assert_eq!(store.incr("k").await?, 1);
        store.expire("k", Duration::from_secs(10)).await?;
        assert_eq!(store.incr("k").await?, 2);
        assert_eq!(store.get("k").await?, Some(2));
        assert_eq!(store.ttl("k").await?, Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await?, None);
        assert_eq!(store.incr("k").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_ttl_none_without_expiry() -> Result<()> {
        let store = MemoryCounterStore::new();
        store.incr("k").await?;
        assert_eq!(store.ttl("k").await?, None);
        assert_eq!(store.ttl("missing").await?, None);
        store.delete("k").await?;
        assert_eq!(store.get("k").await?, None);
        Ok(())
    }
}
