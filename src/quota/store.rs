//! Counter Store
//!
//! [`AtomicCounterStore`] is the capability the quota engine needs from a
//! shared counting service. Every check-and-mutate sequence is exposed as one
//! operation that the backend must execute indivisibly: the Redis backend runs
//! it as a Lua script, [`InMemoryCounterStore`] runs it inside one critical
//! section of a single-writer shard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::StoreError;
use crate::clock::{deadline, remaining, SharedClock};

/// How a window operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    /// Key was absent and has been created with the increment
    New,
    /// Increment committed
    Allowed,
    /// Increment would exceed the limit; nothing was written
    Exceeded,
}

/// Result of a windowed check-and-increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    /// Count after the operation (before it, when exceeded)
    pub count: u64,

    /// Remaining window for fixed windows, time until capacity for exceeded
    /// sliding windows, full window for admitted sliding windows
    pub ttl: Duration,

    pub status: WindowStatus,
}

impl WindowOutcome {
    pub fn is_allowed(&self) -> bool {
        self.status != WindowStatus::Exceeded
    }
}

/// Shared atomic counting service
#[async_trait]
pub trait AtomicCounterStore: Send + Sync {
    /// Integer value of `key`, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Overwrite `key` with `value`, expiring after `ttl`
    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError>;

    /// Add `delta` to `key` (absent counts as 0) and return the new value
    async fn increment_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Set the expiry of an existing key; false when the key is absent
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining lifetime; `None` when absent or without expiry
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Remove `key`; false when it did not exist
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Fixed-window check-and-increment, executed atomically
    async fn fixed_window(
        &self,
        key: &str,
        window: Duration,
        increment: u64,
        limit: u64,
    ) -> Result<WindowOutcome, StoreError>;

    /// Sliding-window count-and-add over timestamped entries, executed atomically
    async fn sliding_window(
        &self,
        key: &str,
        window: Duration,
        increment: u64,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<WindowOutcome, StoreError>;
}

#[derive(Debug)]
struct ScoredEntry {
    score_ms: i64,
    #[allow(dead_code)]
    member: String,
}

#[derive(Debug)]
enum Value {
    Counter(i64),
    /// Kept sorted by score
    Scored(Vec<ScoredEntry>),
}

#[derive(Debug)]
struct Slot {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process single-writer counter shard
///
/// All operations run under one lock, which makes each of them linearizable
/// among the tasks of this process. It is shared state only within one
/// process; multi-instance deployments need the Redis backend.
#[derive(Debug)]
pub struct InMemoryCounterStore {
    slots: Mutex<HashMap<String, Slot>>,
    clock: SharedClock,
}

impl InMemoryCounterStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let slots = self.slots.lock().await;
        slots.values().filter(|s| !s.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of live entries in a sliding-window key
    pub async fn cardinality(&self, key: &str) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        purge_expired(&mut slots, key, now);
        match slots.get(key) {
            None => Ok(0),
            Some(Slot {
                value: Value::Scored(entries),
                ..
            }) => Ok(entries.len() as u64),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }
}

fn purge_expired(slots: &mut HashMap<String, Slot>, key: &str, now: DateTime<Utc>) {
    if slots.get(key).is_some_and(|slot| slot.is_expired(now)) {
        slots.remove(key);
    }
}

fn counter_value(slot: &Slot, key: &str) -> Result<i64, StoreError> {
    match slot.value {
        Value::Counter(v) => Ok(v),
        Value::Scored(_) => Err(StoreError::WrongType(key.to_string())),
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX / 2)
}

#[async_trait]
impl AtomicCounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        purge_expired(&mut slots, key, now);
        slots.get(key).map(|slot| counter_value(slot, key)).transpose()
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        slots.insert(
            key.to_string(),
            Slot {
                value: Value::Counter(value),
                expires_at: Some(deadline(now, ttl)),
            },
        );
        Ok(())
    }

    async fn increment_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        purge_expired(&mut slots, key, now);
        let slot = slots.entry(key.to_string()).or_insert(Slot {
            value: Value::Counter(0),
            expires_at: None,
        });
        match &mut slot.value {
            Value::Counter(v) => {
                *v = v.saturating_add(delta);
                Ok(*v)
            }
            Value::Scored(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        purge_expired(&mut slots, key, now);
        match slots.get_mut(key) {
            Some(slot) => {
                slot.expires_at = Some(deadline(now, ttl));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        purge_expired(&mut slots, key, now);
        Ok(slots
            .get(key)
            .and_then(|slot| slot.expires_at)
            .map(|at| remaining(now, at)))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        purge_expired(&mut slots, key, now);
        Ok(slots.remove(key).is_some())
    }

    async fn fixed_window(
        &self,
        key: &str,
        window: Duration,
        increment: u64,
        limit: u64,
    ) -> Result<WindowOutcome, StoreError> {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        purge_expired(&mut slots, key, now);

        let Some(slot) = slots.get_mut(key) else {
            if increment > limit {
                return Ok(WindowOutcome {
                    count: 0,
                    ttl: window,
                    status: WindowStatus::Exceeded,
                });
            }
            slots.insert(
                key.to_string(),
                Slot {
                    value: Value::Counter(increment as i64),
                    expires_at: Some(deadline(now, window)),
                },
            );
            return Ok(WindowOutcome {
                count: increment,
                ttl: window,
                status: WindowStatus::New,
            });
        };

        let current = counter_value(slot, key)?.max(0) as u64;
        let ttl = slot.expires_at.map(|at| remaining(now, at)).unwrap_or(window);

        if current.saturating_add(increment) > limit {
            return Ok(WindowOutcome {
                count: current,
                ttl,
                status: WindowStatus::Exceeded,
            });
        }

        let total = current + increment;
        slot.value = Value::Counter(total as i64);
        Ok(WindowOutcome {
            count: total,
            ttl,
            status: WindowStatus::Allowed,
        })
    }

    async fn sliding_window(
        &self,
        key: &str,
        window: Duration,
        increment: u64,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<WindowOutcome, StoreError> {
        let store_now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let window_ms = millis(window);
        let cutoff = now_ms - window_ms;

        let mut slots = self.slots.lock().await;
        purge_expired(&mut slots, key, store_now);

        let slot = slots.entry(key.to_string()).or_insert(Slot {
            value: Value::Scored(Vec::new()),
            expires_at: None,
        });
        let Value::Scored(entries) = &mut slot.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };

        entries.retain(|e| e.score_ms >= cutoff);
        let count = entries.len() as u64;

        if count.saturating_add(increment) > limit {
            let retry_ms = entries
                .first()
                .map(|oldest| oldest.score_ms + window_ms - now_ms)
                .unwrap_or(window_ms)
                .max(0);
            let outcome = WindowOutcome {
                count,
                ttl: Duration::from_millis(retry_ms as u64),
                status: WindowStatus::Exceeded,
            };
            if entries.is_empty() {
                slots.remove(key);
            }
            return Ok(outcome);
        }

        for _ in 0..increment {
            let at = entries.partition_point(|e| e.score_ms <= now_ms);
            entries.insert(
                at,
                ScoredEntry {
                    score_ms: now_ms,
                    member: format!("{}-{}", now_ms, Uuid::new_v4()),
                },
            );
        }
        slot.expires_at = Some(deadline(store_now, window));

        Ok(WindowOutcome {
            count: count + increment,
            ttl: window,
            status: WindowStatus::Allowed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::sync::Arc;

    fn store() -> (Arc<ManualClock>, InMemoryCounterStore) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = InMemoryCounterStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let (clock, store) = store();
        store.set_with_ttl("k", 7, Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(7));
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(10)));

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_increment_creates_counter() {
        let (_clock, store) = store();
        assert_eq!(store.increment_by("c", 3).await.unwrap(), 3);
        assert_eq!(store.increment_by("c", -1).await.unwrap(), 2);
        assert_eq!(store.ttl("c").await.unwrap(), None);
        assert!(store.expire("c", Duration::from_secs(5)).await.unwrap());
        assert!(!store.expire("missing", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_fixed_window_new_allowed_exceeded() {
        let (clock, store) = store();
        let window = Duration::from_secs(60);

        let first = store.fixed_window("fw", window, 2, 5).await.unwrap();
        assert_eq!(first.status, WindowStatus::New);
        assert_eq!(first.count, 2);

        clock.advance(Duration::from_secs(15));
        let second = store.fixed_window("fw", window, 3, 5).await.unwrap();
        assert_eq!(second.status, WindowStatus::Allowed);
        assert_eq!(second.count, 5);
        assert_eq!(second.ttl, Duration::from_secs(45));

        let third = store.fixed_window("fw", window, 1, 5).await.unwrap();
        assert_eq!(third.status, WindowStatus::Exceeded);
        assert_eq!(third.count, 5);
        assert_eq!(store.get("fw").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_fixed_window_resets_after_ttl() {
        let (clock, store) = store();
        let window = Duration::from_secs(60);
        store.fixed_window("fw", window, 5, 5).await.unwrap();
        clock.advance(window);
        let outcome = store.fixed_window("fw", window, 1, 5).await.unwrap();
        assert_eq!(outcome.status, WindowStatus::New);
        assert_eq!(outcome.count, 1);
    }

    #[tokio::test]
    async fn test_fixed_window_oversized_first_increment() {
        let (_clock, store) = store();
        let outcome = store
            .fixed_window("fw", Duration::from_secs(60), 6, 5)
            .await
            .unwrap();
        assert_eq!(outcome.status, WindowStatus::Exceeded);
        assert_eq!(store.get("fw").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sliding_window_retry_after_tracks_oldest_entry() {
        let (clock, store) = store();
        let window = Duration::from_secs(60);

        store
            .sliding_window("sw", window, 1, 2, clock.now())
            .await
            .unwrap();
        clock.advance(Duration::from_secs(20));
        store
            .sliding_window("sw", window, 1, 2, clock.now())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(10));
        let outcome = store
            .sliding_window("sw", window, 1, 2, clock.now())
            .await
            .unwrap();
        assert_eq!(outcome.status, WindowStatus::Exceeded);
        assert_eq!(outcome.count, 2);
        // Oldest entry was written 30s ago
        assert_eq!(outcome.ttl, Duration::from_secs(30));
        assert_eq!(store.cardinality("sw").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let (clock, store) = store();
        store
            .sliding_window("mixed", Duration::from_secs(60), 1, 5, clock.now())
            .await
            .unwrap();
        let err = store.increment_by("mixed", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType(_)));
    }
}
