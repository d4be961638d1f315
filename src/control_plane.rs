//! Control Plane Assembly
//!
//! Builds the quota engine, the region health monitor and the failover
//! engine from one [`Config`], sharing a clock and a counter store.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::failover::{FailoverDecisionEngine, InMemoryDirectory, TracingComplianceLog};
use crate::quota::{AtomicCounterStore, InMemoryCounterStore, QuotaEngine, StaticLimitsProvider};
use crate::region::{
    CounterStoreCacheProbe, HealthProbes, HttpProviderProbe, RegionHealthMonitor, RegionTopology, StaticProbes,
    TcpDependencyProbe, TopologyHandle,
};

/// The three control plane components wired together
pub struct ControlPlane {
    pub quota: QuotaEngine,
    pub monitor: Arc<RegionHealthMonitor>,
    pub failover: FailoverDecisionEngine,
    pub directory: Arc<InMemoryDirectory>,
    pub limits: Arc<StaticLimitsProvider>,

    /// Present when live probes are disabled; lets callers script outages
    pub static_probes: Option<Arc<StaticProbes>>,
}

impl ControlPlane {
    /// Assemble the control plane
    ///
    /// Connects to Redis when `quota.redis_url` is set and the `redis-store`
    /// feature is compiled in; otherwise counters live in process.
    pub async fn build(config: &Config, clock: SharedClock) -> Result<Self> {
        config.validate()?;
        let store = counter_store(config, clock.clone()).await?;

        let limits = Arc::new(StaticLimitsProvider::from_config(&config.quota));
        let quota = QuotaEngine::new(config.quota.clone(), store.clone(), limits.clone(), clock.clone());

        let topology = RegionTopology::new(config.topology.regions.clone()).context("Invalid region topology")?;
        let (probes, static_probes) = if config.health.live_probes {
            let provider = HttpProviderProbe::new(config.health.provider_timeout())
                .context("Failed to build provider status client")?;
            let probes = HealthProbes::new(
                Arc::new(TcpDependencyProbe),
                Arc::new(CounterStoreCacheProbe::new(store.clone())),
                Arc::new(provider),
            );
            (probes, None)
        } else {
            let scripted = Arc::new(StaticProbes::new());
            (HealthProbes::uniform(scripted.clone()), Some(scripted))
        };

        let monitor = Arc::new(RegionHealthMonitor::new(
            config.health.clone(),
            TopologyHandle::new(topology),
            probes,
            clock.clone(),
        ));

        let directory = Arc::new(InMemoryDirectory::from_config(&config.directory));
        let failover = FailoverDecisionEngine::new(
            config.failover.clone(),
            monitor.clone(),
            directory.clone(),
            directory.clone(),
            Arc::new(TracingComplianceLog),
            clock,
        );

        info!(
            regions = config.topology.regions.len(),
            organizations = config.directory.organizations.len(),
            live_probes = config.health.live_probes,
            "Control plane assembled"
        );

        Ok(Self {
            quota,
            monitor,
            failover,
            directory,
            limits,
            static_probes,
        })
    }

    /// Mark regions down on the scripted probes; ignored with live probes
    pub async fn mark_regions_down(&self, regions: &[String]) -> Result<()> {
        if regions.is_empty() {
            return Ok(());
        }
        let probes = self
            .static_probes
            .as_ref()
            .context("Regions can only be marked down when live probes are disabled")?;
        for region in regions {
            probes.set_region_up(region, false).await;
        }
        Ok(())
    }
}

#[cfg(feature = "redis-store")]
async fn counter_store(config: &Config, clock: SharedClock) -> Result<Arc<dyn AtomicCounterStore>> {
    use crate::quota::redis_store::DEFAULT_OPERATION_TIMEOUT;
    use crate::quota::RedisCounterStore;

    match &config.quota.redis_url {
        Some(url) => {
            let store = RedisCounterStore::connect(url, DEFAULT_OPERATION_TIMEOUT)
                .await
                .context("Failed to connect to Redis counter store")?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryCounterStore::new(clock))),
    }
}

#[cfg(not(feature = "redis-store"))]
async fn counter_store(config: &Config, clock: SharedClock) -> Result<Arc<dyn AtomicCounterStore>> {
    if config.quota.redis_url.is_some() {
        tracing::warn!("Built without the redis-store feature; using the in-process counter store");
    }
    Ok(Arc::new(InMemoryCounterStore::new(clock)))
}
