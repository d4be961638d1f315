//! Redis Counter Store
//!
//! Shared counter store for multi-instance deployments. The two window
//! operations run as Lua scripts so each check-and-mutate is a single atomic
//! server-side step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::error::StoreError;
use super::store::{AtomicCounterStore, WindowOutcome, WindowStatus};

/// Default bound on a single store round trip
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(250);

fn fixed_window_script() -> Script {
    Script::new(include_str!("lua/fixed_window.lua"))
}

fn sliding_window_script() -> Script {
    Script::new(include_str!("lua/sliding_window.lua"))
}

/// Counter store backed by Redis
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: MultiplexedConnection,
    fixed_window: Arc<Script>,
    sliding_window: Arc<Script>,
    operation_timeout: Duration,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to `url` (for example `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str, operation_timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!(url = %url, "Connected to Redis counter store");

        Ok(Self {
            connection,
            fixed_window: Arc::new(fixed_window_script()),
            sliding_window: Arc::new(sliding_window_script()),
            operation_timeout,
        })
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, op).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(self.operation_timeout.as_millis() as u64)),
        }
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX / 2)
}

/// Decode the `{count, ttl_ms, status}` reply of both scripts
fn decode_outcome(reply: (i64, i64, i64)) -> Result<WindowOutcome, StoreError> {
    let (count, ttl_ms, status) = reply;
    let status = match status {
        0 => WindowStatus::New,
        1 => WindowStatus::Allowed,
        2 => WindowStatus::Exceeded,
        other => return Err(StoreError::Protocol(format!("unknown window status {}", other))),
    };
    Ok(WindowOutcome {
        count: count.max(0) as u64,
        ttl: Duration::from_millis(ttl_ms.max(0) as u64),
        status,
    })
}

#[async_trait]
impl AtomicCounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.connection.clone();
        let cmd = redis::cmd("GET").arg(key).clone();
        self.bounded(async move { cmd.query_async(&mut conn).await }).await
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let cmd = redis::cmd("SET").arg(key).arg(value).arg("PX").arg(millis(ttl)).clone();
        self.bounded(async move { cmd.query_async(&mut conn).await }).await
    }

    async fn increment_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        let cmd = redis::cmd("INCRBY").arg(key).arg(delta).clone();
        self.bounded(async move { cmd.query_async(&mut conn).await }).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let cmd = redis::cmd("PEXPIRE").arg(key).arg(millis(ttl)).clone();
        self.bounded(async move { cmd.query_async(&mut conn).await }).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.connection.clone();
        let cmd = redis::cmd("PTTL").arg(key).clone();
        let ttl_ms: i64 = self.bounded(async move { cmd.query_async(&mut conn).await }).await?;
        // -2 absent, -1 no expiry
        Ok((ttl_ms >= 0).then(|| Duration::from_millis(ttl_ms as u64)))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let cmd = redis::cmd("DEL").arg(key).clone();
        let removed: i64 = self.bounded(async move { cmd.query_async(&mut conn).await }).await?;
        Ok(removed > 0)
    }

    async fn fixed_window(
        &self,
        key: &str,
        window: Duration,
        increment: u64,
        limit: u64,
    ) -> Result<WindowOutcome, StoreError> {
        let mut conn = self.connection.clone();
        let mut invocation = self.fixed_window.prepare_invoke();
        invocation.key(key).arg(millis(window)).arg(increment).arg(limit);
        let reply: (i64, i64, i64) = self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        decode_outcome(reply)
    }

    async fn sliding_window(
        &self,
        key: &str,
        window: Duration,
        increment: u64,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<WindowOutcome, StoreError> {
        let mut conn = self.connection.clone();
        let mut invocation = self.sliding_window.prepare_invoke();
        invocation
            .key(key)
            .arg(now.timestamp_millis())
            .arg(millis(window))
            .arg(increment)
            .arg(limit)
            .arg(Uuid::new_v4().to_string());
        let reply: (i64, i64, i64) = self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        decode_outcome(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_outcome() {
        let outcome = decode_outcome((5, 45_000, 1)).unwrap();
        assert_eq!(outcome.status, WindowStatus::Allowed);
        assert_eq!(outcome.count, 5);
        assert_eq!(outcome.ttl, Duration::from_secs(45));

        let exceeded = decode_outcome((7, -1, 2)).unwrap();
        assert_eq!(exceeded.status, WindowStatus::Exceeded);
        assert_eq!(exceeded.ttl, Duration::ZERO);
    }

    #[test]
    fn test_decode_rejects_unknown_status() {
        assert!(matches!(decode_outcome((0, 0, 9)), Err(StoreError::Protocol(_))));
    }

    #[test]
    fn test_scripts_load() {
        assert!(!fixed_window_script().get_hash().is_empty());
        assert!(!sliding_window_script().get_hash().is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused_is_unavailable() {
        // Nothing listens on port 1
        let result = RedisCounterStore::connect("redis://127.0.0.1:1/", DEFAULT_OPERATION_TIMEOUT).await;
        assert!(result.is_err());
    }
}
