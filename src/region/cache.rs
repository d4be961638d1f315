//! Health Cache
//!
//! Process-local TTL cache of region health. Instances do not share it, so
//! two instances may briefly disagree about a region.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::health::RegionHealth;
use crate::clock::deadline;

#[derive(Debug, Clone)]
struct CachedHealth {
    health: RegionHealth,
    expires_at: DateTime<Utc>,
}

/// Per-region TTL cache
#[derive(Debug)]
pub struct HealthCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedHealth>>,
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached health when still fresh at `now`
    pub async fn get(&self, region: &str, now: DateTime<Utc>) -> Option<RegionHealth> {
        let entries = self.entries.read().await;
        entries
            .get(region)
            .filter(|cached| cached.expires_at > now)
            .map(|cached| cached.health.clone())
    }

    pub async fn insert(&self, health: RegionHealth, now: DateTime<Utc>) {
        let expires_at = deadline(now, self.ttl);
        let mut entries = self.entries.write().await;
        entries.insert(health.region.clone(), CachedHealth { health, expires_at });
    }

    /// Drop one region; true when it was cached
    pub async fn invalidate(&self, region: &str) -> bool {
        self.entries.write().await.remove(region).is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of entries, fresh or not
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
