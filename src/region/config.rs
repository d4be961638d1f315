//! Region Health Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::topology::{builtin_sites, RegionSite};

/// External provider probed for availability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    /// Statuspage-style JSON endpoint; providers without one count as available
    #[serde(default)]
    pub status_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(name: &str, status_url: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            status_url: status_url.map(str::to_string),
        }
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// How long a region's health is served from cache
    pub cache_ttl_secs: u64,

    /// Dependency store is healthy below this round trip
    pub database_threshold_ms: u64,

    /// Cache store is healthy below this round trip
    pub cache_threshold_ms: u64,

    /// Bound on each provider status request
    pub provider_timeout_secs: u64,

    /// Providers probed for every region
    pub providers: Vec<ProviderConfig>,

    /// Background refresh period (0 disables the refresher)
    pub refresh_interval_secs: u64,

    /// Minimum score for a region to receive traffic
    pub routable_score: u8,

    /// Minimum score for the `healthy` label
    pub healthy_score: u8,

    /// Minimum score for the `degraded` label
    pub degraded_score: u8,

    /// Probe real dependencies instead of the scripted probes
    ///
    /// Off by default: live checks need a `database_endpoint` on every
    /// region, and the built-in region table carries none.
    pub live_probes: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            database_threshold_ms: 1000,
            cache_threshold_ms: 500,
            provider_timeout_secs: 5,
            providers: vec![
                ProviderConfig::new("openai", Some("https://status.openai.com/api/v2/status.json")),
                ProviderConfig::new("anthropic", Some("https://status.anthropic.com/api/v2/status.json")),
                ProviderConfig::new("google", None),
            ],
            refresh_interval_secs: 0,
            routable_score: 70,
            healthy_score: 80,
            degraded_score: 50,
            live_probes: false,
        }
    }
}

impl HealthConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn database_threshold(&self) -> Duration {
        Duration::from_millis(self.database_threshold_ms)
    }

    pub fn cache_threshold(&self) -> Duration {
        Duration::from_millis(self.cache_threshold_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Refresh period, `None` when disabled
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name.clone()).collect()
    }
}

/// Region table configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub regions: Vec<RegionSite>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            regions: builtin_sites(),
        }
    }
}
