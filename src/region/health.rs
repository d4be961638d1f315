//! Region Health Scoring

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::config::HealthConfig;

/// Score deductions
pub const DATABASE_PENALTY: u8 = 40;
pub const CACHE_PENALTY: u8 = 30;
pub const PROVIDER_PENALTY: u8 = 10;

/// Health label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Availability of one external provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub is_available: bool,

    /// Reported indicator, `unknown` when the provider has no status endpoint
    pub status: String,

    pub latency_ms: Option<u64>,
}

impl ProviderStatus {
    /// Provider without a status endpoint
    pub fn unknown(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            is_available: true,
            status: "unknown".to_string(),
            latency_ms: None,
        }
    }

    pub fn unavailable(provider: &str, status: String, latency_ms: Option<u64>) -> Self {
        Self {
            provider: provider.to_string(),
            is_available: false,
            status,
            latency_ms,
        }
    }
}

/// Score boundaries for labels and routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Routing eligibility (`is_healthy`)
    pub routable: u8,
    pub healthy: u8,
    pub degraded: u8,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            routable: 70,
            healthy: 80,
            degraded: 50,
        }
    }
}

impl From<&HealthConfig> for HealthThresholds {
    fn from(config: &HealthConfig) -> Self {
        Self {
            routable: config.routable_score,
            healthy: config.healthy_score,
            degraded: config.degraded_score,
        }
    }
}

impl HealthThresholds {
    pub fn status_for(&self, score: u8) -> HealthStatus {
        if score >= self.healthy {
            HealthStatus::Healthy
        } else if score >= self.degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    pub fn is_routable(&self, score: u8) -> bool {
        score >= self.routable
    }
}

/// 100 minus the penalties of failing signals, floored at 0
pub fn compute_health_score(database_healthy: bool, cache_healthy: bool, unavailable_providers: usize) -> u8 {
    let mut score: i64 = 100;
    if !database_healthy {
        score -= DATABASE_PENALTY as i64;
    }
    if !cache_healthy {
        score -= CACHE_PENALTY as i64;
    }
    score -= PROVIDER_PENALTY as i64 * unavailable_providers as i64;
    score.clamp(0, 100) as u8
}

/// Outcome of one dependency probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalReading {
    pub healthy: bool,
    pub latency_ms: Option<u64>,

    /// Set when the signal is not healthy
    pub issue: Option<String>,
}

impl SignalReading {
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            latency_ms: Some(latency_ms),
            issue: None,
        }
    }

    pub fn unhealthy(latency_ms: Option<u64>, issue: String) -> Self {
        Self {
            healthy: false,
            latency_ms,
            issue: Some(issue),
        }
    }
}

/// Computed health of one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionHealth {
    pub region: String,
    pub database_healthy: bool,
    pub cache_healthy: bool,
    pub database_latency_ms: Option<u64>,
    pub cache_latency_ms: Option<u64>,
    pub provider_health: BTreeMap<String, bool>,
    pub providers: Vec<ProviderStatus>,
    pub health_score: u8,
    pub is_healthy: bool,
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub last_checked: DateTime<Utc>,
}

impl RegionHealth {
    /// Assemble a region's health from its probe readings
    ///
    /// Issues are ordered: database, cache, then providers in configured order.
    pub fn from_readings(
        region: &str,
        database: SignalReading,
        cache: SignalReading,
        providers: Vec<ProviderStatus>,
        thresholds: &HealthThresholds,
        checked_at: DateTime<Utc>,
    ) -> Self {
        let mut issues = Vec::new();
        issues.extend(database.issue.clone());
        issues.extend(cache.issue.clone());
        for provider in providers.iter().filter(|p| !p.is_available) {
            issues.push(format!("Provider {} unavailable ({})", provider.provider, provider.status));
        }

        let unavailable = providers.iter().filter(|p| !p.is_available).count();
        let health_score = compute_health_score(database.healthy, cache.healthy, unavailable);

        Self {
            region: region.to_string(),
            database_healthy: database.healthy,
            cache_healthy: cache.healthy,
            database_latency_ms: database.latency_ms,
            cache_latency_ms: cache.latency_ms,
            provider_health: providers
                .iter()
                .map(|p| (p.provider.clone(), p.is_available))
                .collect(),
            providers,
            health_score,
            is_healthy: thresholds.is_routable(health_score),
            status: thresholds.status_for(health_score),
            issues,
            last_checked: checked_at,
        }
    }

    /// Worst-case result for a check that could not complete
    pub fn failed(region: &str, message: String, checked_at: DateTime<Utc>) -> Self {
        Self {
            region: region.to_string(),
            database_healthy: false,
            cache_healthy: false,
            database_latency_ms: None,
            cache_latency_ms: None,
            provider_health: BTreeMap::new(),
            providers: Vec::new(),
            health_score: 0,
            is_healthy: false,
            status: HealthStatus::Unhealthy,
            issues: vec![message],
            last_checked: checked_at,
        }
    }
}
