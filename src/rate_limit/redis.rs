//! Redis-backed counter store.
//!
//! Uses a multiplexed `ConnectionManager`, which reconnects on its own; the
//! limiter bounds every command with a timeout on top of that.

use super::counter::CounterStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{
    Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use std::time::Duration;
use tracing::Instrument;

#[derive(Clone)]
pub struct RedisCounterStore {
    manager: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect to Redis.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the first connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let config = ConnectionManagerConfig::new().set_number_of_retries(1);
        let client = Client::open(redis_url).context("invalid redis URL")?;
        let manager = client
            .get_connection_manager_with_config(config)
            .await
            .context("failed to connect to redis")?;
        Ok(Self { manager })
    }
}

fn span(operation: &'static str) -> tracing::Span {
    tracing::info_span!("redis.command", db.system = "redis", db.operation = operation)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .instrument(span("INCR"))
            .await
            .context("INCR failed")
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis)
            .query_async::<i64>(&mut conn)
            .instrument(span("PEXPIRE"))
            .await
            .context("PEXPIRE failed")?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.manager.clone();
        let millis = redis::cmd("PTTL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .instrument(span("PTTL"))
            .await
            .context("PTTL failed")?;
        // -2: missing key, -1: no expiry.
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<i64>>(&mut conn)
            .instrument(span("GET"))
            .await
            .context("GET failed")
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .instrument(span("DEL"))
            .await
            .context("DEL failed")?;
        Ok(())
    }
}
