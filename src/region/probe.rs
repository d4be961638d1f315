//! Health Probes
//!
//! Each signal the monitor scores comes from a probe trait so deployments
//! can swap the transport and tests can script outcomes. The monitor owns
//! timing: it measures round trips and enforces the latency bounds, so probe
//! implementations only perform the operation.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use super::config::ProviderConfig;
use super::error::ProbeError;
use super::health::ProviderStatus;
use super::topology::RegionSite;
use crate::quota::AtomicCounterStore;

/// Reachability of a region's primary datastore
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    async fn ping(&self, site: &RegionSite) -> Result<(), ProbeError>;
}

/// Write/read round trip against a region's cache
#[async_trait]
pub trait CacheProbe: Send + Sync {
    /// Write `value` under `key`, then read the key back
    async fn write_read(&self, region: &str, key: &str, value: i64) -> Result<Option<i64>, ProbeError>;
}

/// Availability of an external provider
#[async_trait]
pub trait ProviderStatusProbe: Send + Sync {
    async fn check(&self, provider: &ProviderConfig) -> Result<ProviderStatus, ProbeError>;
}

/// Dependency probe that opens a TCP connection to the site's datastore
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDependencyProbe;

#[async_trait]
impl DependencyProbe for TcpDependencyProbe {
    async fn ping(&self, site: &RegionSite) -> Result<(), ProbeError> {
        let endpoint = site
            .database_endpoint
            .as_deref()
            .ok_or_else(|| ProbeError::NotConfigured(site.name.clone()))?;

        tokio::net::TcpStream::connect(endpoint)
            .await
            .map_err(|e| ProbeError::Unreachable(format!("{}: {}", endpoint, e)))?;
        Ok(())
    }
}

/// Cache probe running against the shared counter store
///
/// Every region checks the same store; only the key differs per region.
/// A store outage therefore marks the cache unhealthy in all regions at
/// once, costing each of them 30 points. Deployments with one cache per
/// region need a `CacheProbe` that connects to that region's cache.
pub struct CounterStoreCacheProbe {
    store: Arc<dyn AtomicCounterStore>,
    ttl: Duration,
}

impl CounterStoreCacheProbe {
    pub fn new(store: Arc<dyn AtomicCounterStore>) -> Self {
        Self {
            store,
            ttl: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl CacheProbe for CounterStoreCacheProbe {
    async fn write_read(&self, _region: &str, key: &str, value: i64) -> Result<Option<i64>, ProbeError> {
        self.store.set_with_ttl(key, value, self.ttl).await?;
        Ok(self.store.get(key).await?)
    }
}

/// Statuspage `status.json` body
#[derive(Debug, Deserialize)]
struct StatusPage {
    status: StatusIndicator,
}

#[derive(Debug, Deserialize)]
struct StatusIndicator {
    indicator: String,
}

/// Provider probe issuing an HTTP GET against the provider's status URL
///
/// A 2xx answer counts as available unless its Statuspage body reports a
/// `major` or `critical` indicator.
#[derive(Debug, Clone)]
pub struct HttpProviderProbe {
    client: reqwest::Client,
}

impl HttpProviderProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("regionguard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProviderStatusProbe for HttpProviderProbe {
    async fn check(&self, provider: &ProviderConfig) -> Result<ProviderStatus, ProbeError> {
        let Some(url) = provider.status_url.as_deref() else {
            return Ok(ProviderStatus::unknown(&provider.name));
        };

        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let code = response.status();
        let body = response.bytes().await?;
        let latency_ms = Some(start.elapsed().as_millis() as u64);

        if !code.is_success() {
            return Ok(ProviderStatus::unavailable(
                &provider.name,
                format!("http {}", code.as_u16()),
                latency_ms,
            ));
        }

        let indicator = match serde_json::from_slice::<StatusPage>(&body) {
            Ok(page) => page.status.indicator,
            Err(e) => {
                debug!(provider = %provider.name, error = %e, "Status body is not a status page");
                "ok".to_string()
            }
        };
        let is_available = !matches!(indicator.as_str(), "major" | "critical");

        Ok(ProviderStatus {
            provider: provider.name.clone(),
            is_available,
            status: indicator,
            latency_ms,
        })
    }
}

#[derive(Debug, Default)]
struct ScriptedState {
    database_down: HashSet<String>,
    cache_down: HashSet<String>,
    cache_corrupt: HashSet<String>,
    providers_down: HashSet<String>,
    database_delay: Option<Duration>,
    cache_delay: Option<Duration>,
}

/// Scripted probes for offline operation and tests
///
/// Every signal is up until marked down.
#[derive(Debug, Default)]
pub struct StaticProbes {
    state: RwLock<ScriptedState>,
}

impl StaticProbes {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_database_up(&self, region: &str, up: bool) {
        toggle(&mut self.state.write().await.database_down, region, !up);
    }

    pub async fn set_cache_up(&self, region: &str, up: bool) {
        toggle(&mut self.state.write().await.cache_down, region, !up);
    }

    /// Make the cache read back a different value than written
    pub async fn set_cache_corrupt(&self, region: &str, corrupt: bool) {
        toggle(&mut self.state.write().await.cache_corrupt, region, corrupt);
    }

    pub async fn set_provider_up(&self, provider: &str, up: bool) {
        toggle(&mut self.state.write().await.providers_down, provider, !up);
    }

    /// Mark a whole region down (database and cache)
    pub async fn set_region_up(&self, region: &str, up: bool) {
        let mut state = self.state.write().await;
        toggle(&mut state.database_down, region, !up);
        toggle(&mut state.cache_down, region, !up);
    }

    pub async fn set_database_delay(&self, delay: Option<Duration>) {
        self.state.write().await.database_delay = delay;
    }

    pub async fn set_cache_delay(&self, delay: Option<Duration>) {
        self.state.write().await.cache_delay = delay;
    }
}

fn toggle(set: &mut HashSet<String>, name: &str, member: bool) {
    if member {
        set.insert(name.to_string());
    } else {
        set.remove(name);
    }
}

#[async_trait]
impl DependencyProbe for StaticProbes {
    async fn ping(&self, site: &RegionSite) -> Result<(), ProbeError> {
        let (down, delay) = {
            let state = self.state.read().await;
            (state.database_down.contains(&site.name), state.database_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if down {
            return Err(ProbeError::Unreachable(format!("{} datastore marked down", site.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheProbe for StaticProbes {
    async fn write_read(&self, region: &str, _key: &str, value: i64) -> Result<Option<i64>, ProbeError> {
        let (down, corrupt, delay) = {
            let state = self.state.read().await;
            (
                state.cache_down.contains(region),
                state.cache_corrupt.contains(region),
                state.cache_delay,
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if down {
            return Err(ProbeError::Unreachable(format!("{} cache marked down", region)));
        }
        Ok(Some(if corrupt { value.wrapping_add(1) } else { value }))
    }
}

#[async_trait]
impl ProviderStatusProbe for StaticProbes {
    async fn check(&self, provider: &ProviderConfig) -> Result<ProviderStatus, ProbeError> {
        if self.state.read().await.providers_down.contains(&provider.name) {
            return Ok(ProviderStatus::unavailable(&provider.name, "major".to_string(), Some(0)));
        }
        if provider.status_url.is_none() {
            return Ok(ProviderStatus::unknown(&provider.name));
        }
        Ok(ProviderStatus {
            provider: provider.name.clone(),
            is_available: true,
            status: "none".to_string(),
            latency_ms: Some(0),
        })
    }
}
