//! Region Health Monitor
//!
//! Scores every region from its datastore, cache and provider probes and
//! answers nearest-healthy-region queries. A health check never fails:
//! anything that goes wrong while probing a region is folded into a
//! worst-case result.

use futures::future::join_all;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::HealthCache;
use super::config::HealthConfig;
use super::health::{HealthThresholds, ProviderStatus, RegionHealth, SignalReading};
use super::probe::{CacheProbe, DependencyProbe, ProviderStatusProbe};
use super::topology::{RegionSite, RegionTopology, TopologyHandle};
use crate::clock::SharedClock;
use crate::metrics;

/// Probe set used by the monitor
#[derive(Clone)]
pub struct HealthProbes {
    pub dependency: Arc<dyn DependencyProbe>,
    pub cache: Arc<dyn CacheProbe>,
    pub provider: Arc<dyn ProviderStatusProbe>,
}

impl HealthProbes {
    pub fn new(
        dependency: Arc<dyn DependencyProbe>,
        cache: Arc<dyn CacheProbe>,
        provider: Arc<dyn ProviderStatusProbe>,
    ) -> Self {
        Self {
            dependency,
            cache,
            provider,
        }
    }

    /// One implementation for all three signals
    pub fn uniform<P>(probe: Arc<P>) -> Self
    where
        P: DependencyProbe + CacheProbe + ProviderStatusProbe + 'static,
    {
        Self {
            dependency: probe.clone(),
            cache: probe.clone(),
            provider: probe,
        }
    }
}

/// Region health monitor
pub struct RegionHealthMonitor {
    config: HealthConfig,
    thresholds: HealthThresholds,
    topology: TopologyHandle,
    probes: HealthProbes,
    cache: HealthCache,
    clock: SharedClock,
}

impl RegionHealthMonitor {
    pub fn new(config: HealthConfig, topology: TopologyHandle, probes: HealthProbes, clock: SharedClock) -> Self {
        Self {
            thresholds: HealthThresholds::from(&config),
            cache: HealthCache::new(config.cache_ttl()),
            config,
            topology,
            probes,
            clock,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn topology(&self) -> &TopologyHandle {
        &self.topology
    }

    /// Health of one region, served from cache while fresh
    pub async fn check_region_health(&self, region: &str) -> RegionHealth {
        if let Some(cached) = self.cache.get(region, self.clock.now()).await {
            metrics::HEALTH_CACHE_HITS_TOTAL.inc();
            return cached;
        }

        let start = Instant::now();
        let health = match AssertUnwindSafe(self.probe_region(region)).catch_unwind().await {
            Ok(Ok(health)) => health,
            Ok(Err(message)) => {
                warn!(region = %region, error = %message, "Region health check failed");
                RegionHealth::failed(region, message, self.clock.now())
            }
            Err(_) => {
                warn!(region = %region, "Region health check panicked");
                RegionHealth::failed(region, "Health check panicked".to_string(), self.clock.now())
            }
        };

        metrics::HEALTH_CHECK_DURATION_SECONDS
            .with_label_values(&[region])
            .observe(start.elapsed().as_secs_f64());
        metrics::REGION_HEALTH_SCORE
            .with_label_values(&[region])
            .set(health.health_score as i64);
        metrics::REGION_HEALTHY
            .with_label_values(&[region])
            .set(health.is_healthy as i64);

        if !health.is_healthy {
            warn!(
                region = %region,
                score = health.health_score,
                issues = ?health.issues,
                "Region not routable"
            );
        } else {
            debug!(region = %region, score = health.health_score, status = %health.status, "Region health checked");
        }

        self.cache.insert(health.clone(), self.clock.now()).await;
        health
    }

    async fn probe_region(&self, region: &str) -> Result<RegionHealth, String> {
        let topology = self.topology.snapshot().await;
        let site = topology
            .get(region)
            .cloned()
            .ok_or_else(|| format!("Unknown region {}", region))?;

        let (database, cache, providers) = tokio::join!(
            self.probe_database(&site),
            self.probe_cache(region),
            self.probe_providers(),
        );

        Ok(RegionHealth::from_readings(
            region,
            database,
            cache,
            providers,
            &self.thresholds,
            self.clock.now(),
        ))
    }

    async fn probe_database(&self, site: &RegionSite) -> SignalReading {
        let threshold = self.config.database_threshold();
        let start = Instant::now();
        let result = tokio::time::timeout(threshold, self.probes.dependency.ping(site)).await;
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(())) if elapsed < threshold => SignalReading::healthy(elapsed.as_millis() as u64),
            Ok(Ok(())) => SignalReading::unhealthy(
                Some(elapsed.as_millis() as u64),
                format!("Database latency {}ms exceeds {}ms", elapsed.as_millis(), threshold.as_millis()),
            ),
            Ok(Err(e)) => SignalReading::unhealthy(Some(elapsed.as_millis() as u64), format!("Database unreachable: {}", e)),
            Err(_) => SignalReading::unhealthy(None, format!("Database did not answer within {}ms", threshold.as_millis())),
        }
    }

    async fn probe_cache(&self, region: &str) -> SignalReading {
        let threshold = self.config.cache_threshold();
        let key = format!("health:probe:{}", region);
        let value = self.clock.now().timestamp_millis();

        let start = Instant::now();
        let result = tokio::time::timeout(threshold, self.probes.cache.write_read(region, &key, value)).await;
        let elapsed = start.elapsed();
        let latency = Some(elapsed.as_millis() as u64);

        match result {
            Ok(Ok(Some(read))) if read == value && elapsed < threshold => {
                SignalReading::healthy(elapsed.as_millis() as u64)
            }
            Ok(Ok(Some(read))) if read == value => SignalReading::unhealthy(
                latency,
                format!("Cache latency {}ms exceeds {}ms", elapsed.as_millis(), threshold.as_millis()),
            ),
            Ok(Ok(read)) => SignalReading::unhealthy(
                latency,
                format!("Cache probe read back {:?}, expected {}", read, value),
            ),
            Ok(Err(e)) => SignalReading::unhealthy(latency, format!("Cache unreachable: {}", e)),
            Err(_) => SignalReading::unhealthy(None, format!("Cache did not answer within {}ms", threshold.as_millis())),
        }
    }

    async fn probe_providers(&self) -> Vec<ProviderStatus> {
        let timeout = self.config.provider_timeout();
        let checks = self.config.providers.iter().map(|provider| async move {
            match tokio::time::timeout(timeout, self.probes.provider.check(provider)).await {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => ProviderStatus::unavailable(&provider.name, format!("error: {}", e), None),
                Err(_) => ProviderStatus::unavailable(&provider.name, "timeout".to_string(), None),
            }
        });
        join_all(checks).await
    }

    /// Health of every configured region
    pub async fn get_all_region_health(&self) -> BTreeMap<String, RegionHealth> {
        let regions = self.topology.snapshot().await.regions();
        let checks = regions.iter().map(|region| self.check_region_health(region));
        join_all(checks)
            .await
            .into_iter()
            .map(|health| (health.region.clone(), health))
            .collect()
    }

    pub async fn is_region_healthy(&self, region: &str) -> bool {
        self.check_region_health(region).await.is_healthy
    }

    /// Routable regions in configured order
    pub async fn healthy_regions(&self) -> Vec<String> {
        let regions = self.topology.snapshot().await.regions();
        let checks = regions.iter().map(|region| self.check_region_health(region));
        join_all(checks)
            .await
            .into_iter()
            .filter(|health| health.is_healthy)
            .map(|health| health.region)
            .collect()
    }

    /// Nearest routable candidate to `from`
    ///
    /// Returns `None` only for an empty candidate list; when no candidate is
    /// routable the best-scoring one is returned as a last resort.
    pub async fn get_nearest_healthy_region(&self, from: &str, candidates: &[String]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let evaluated = join_all(candidates.iter().map(|region| self.check_region_health(region))).await;
        let topology = self.topology.snapshot().await;
        select_nearest(from, &evaluated, &topology)
    }

    /// Drop a region's cached health
    pub async fn invalidate(&self, region: &str) -> bool {
        self.cache.invalidate(region).await
    }

    pub async fn invalidate_all(&self) {
        self.cache.clear().await;
    }

    /// Re-probe every region, bypassing the cache
    pub async fn refresh_all(&self) -> BTreeMap<String, RegionHealth> {
        self.invalidate_all().await;
        self.get_all_region_health().await
    }

    /// Re-probe all regions every `interval` until stopped
    pub fn spawn_refresher(self: Arc<Self>, interval: Duration) -> HealthRefresher {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "Region health refresher started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let all = self.refresh_all().await;
                        let healthy = all.values().filter(|h| h.is_healthy).count();
                        debug!(regions = all.len(), healthy, "Region health refreshed");
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Region health refresher stopped");
        });
        HealthRefresher { stop: stop_tx, task }
    }
}

/// Handle to a running background refresher
pub struct HealthRefresher {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HealthRefresher {
    /// Stop the refresher and wait for it to exit
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Region health refresher ended abnormally");
        }
    }
}

/// Nearest-region choice over already evaluated candidates
///
/// Healthy `from` wins outright; unknown `from` coordinates fall back to the
/// first healthy candidate; with no healthy candidate the highest score wins
/// (earliest on ties).
pub fn select_nearest(from: &str, evaluated: &[RegionHealth], topology: &RegionTopology) -> Option<String> {
    let healthy: Vec<&RegionHealth> = evaluated.iter().filter(|h| h.is_healthy).collect();

    if healthy.is_empty() {
        let mut best: Option<&RegionHealth> = None;
        for health in evaluated {
            if best.map_or(true, |b| health.health_score > b.health_score) {
                best = Some(health);
            }
        }
        return best.map(|h| h.region.clone());
    }

    if healthy.iter().any(|h| h.region == from) {
        return Some(from.to_string());
    }

    let Some(origin) = topology.location(from) else {
        return Some(healthy[0].region.clone());
    };

    let mut nearest: Option<(&RegionHealth, f64)> = None;
    for health in &healthy {
        let Some(location) = topology.location(&health.region) else {
            continue;
        };
        let distance = origin.distance_km(&location);
        if nearest.map_or(true, |(_, d)| distance < d) {
            nearest = Some((health, distance));
        }
    }

    Some(nearest.map_or_else(|| healthy[0].region.clone(), |(h, _)| h.region.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::region::config::ProviderConfig;
    use crate::region::health::HealthStatus;
    use crate::region::probe::StaticProbes;
    use chrono::Utc;

    fn config() -> HealthConfig {
        HealthConfig {
            providers: vec![
                ProviderConfig::new("openai", Some("https://status.openai.test/api/v2/status.json")),
                ProviderConfig::new("anthropic", Some("https://status.anthropic.test/api/v2/status.json")),
                ProviderConfig::new("google", None),
            ],
            ..HealthConfig::default()
        }
    }

    fn monitor_with(config: HealthConfig) -> (Arc<ManualClock>, Arc<StaticProbes>, RegionHealthMonitor) {
        let clock = Arc::new(ManualClock::starting_now());
        let probes = Arc::new(StaticProbes::new());
        let monitor = RegionHealthMonitor::new(
            config,
            TopologyHandle::new(RegionTopology::builtin()),
            HealthProbes::uniform(probes.clone()),
            clock.clone(),
        );
        (clock, probes, monitor)
    }

    fn monitor() -> (Arc<ManualClock>, Arc<StaticProbes>, RegionHealthMonitor) {
        monitor_with(config())
    }

    fn health(region: &str, score: u8) -> RegionHealth {
        let thresholds = HealthThresholds::default();
        let mut h = RegionHealth::failed(region, String::new(), Utc::now());
        h.health_score = score;
        h.is_healthy = thresholds.is_routable(score);
        h.status = thresholds.status_for(score);
        h.issues.clear();
        h
    }

    #[tokio::test]
    async fn test_all_signals_up() {
        let (_clock, _probes, monitor) = monitor();
        let health = monitor.check_region_health("us-east-1").await;
        assert_eq!(health.health_score, 100);
        assert!(health.is_healthy);
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.issues.is_empty());
        assert_eq!(health.provider_health.len(), 3);
    }

    #[tokio::test]
    async fn test_database_down_scores_sixty() {
        let (_clock, probes, monitor) = monitor();
        probes.set_database_up("us-east-1", false).await;
        let health = monitor.check_region_health("us-east-1").await;
        assert_eq!(health.health_score, 60);
        assert!(!health.is_healthy);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.issues[0].starts_with("Database unreachable"));
    }

    #[tokio::test]
    async fn test_cache_mismatch_is_unhealthy_cache() {
        let (_clock, probes, monitor) = monitor();
        probes.set_cache_corrupt("eu-west-1", true).await;
        let health = monitor.check_region_health("eu-west-1").await;
        assert!(!health.cache_healthy);
        assert_eq!(health.health_score, 70);
        assert!(health.is_healthy);
    }

    #[tokio::test]
    async fn test_three_providers_down() {
        let (_clock, probes, monitor) = monitor();
        for p in ["openai", "anthropic", "google"] {
            probes.set_provider_up(p, false).await;
        }
        let health = monitor.check_region_health("us-east-1").await;
        assert_eq!(health.health_score, 70);
        assert_eq!(health.provider_health.values().filter(|up| !**up).count(), 3);
    }

    #[tokio::test]
    async fn test_slow_cache_exceeds_threshold() {
        let (_clock, probes, monitor) = monitor_with(HealthConfig {
            cache_threshold_ms: 20,
            ..config()
        });
        probes.set_cache_delay(Some(Duration::from_millis(100))).await;
        let health = monitor.check_region_health("us-east-1").await;
        assert!(!health.cache_healthy);
        assert!(health.database_healthy);
        assert!(health.issues[0].starts_with("Cache did not answer"));
    }

    #[tokio::test]
    async fn test_unknown_region_is_worst_case() {
        let (_clock, _probes, monitor) = monitor();
        let health = monitor.check_region_health("mars-north-1").await;
        assert_eq!(health.health_score, 0);
        assert!(!health.is_healthy);
        assert_eq!(health.issues, vec!["Unknown region mars-north-1".to_string()]);
    }

    #[tokio::test]
    async fn test_cache_hit_and_expiry() {
        let (clock, probes, monitor) = monitor();
        let first = monitor.check_region_health("us-east-1").await;
        assert!(first.is_healthy);

        probes.set_region_up("us-east-1", false).await;
        clock.advance(Duration::from_secs(29));
        let cached = monitor.check_region_health("us-east-1").await;
        assert_eq!(cached, first);

        clock.advance(Duration::from_secs(1));
        let fresh = monitor.check_region_health("us-east-1").await;
        assert_eq!(fresh.health_score, 30);
    }

    #[tokio::test]
    async fn test_invalidate_forces_probe() {
        let (_clock, probes, monitor) = monitor();
        assert!(monitor.is_region_healthy("eu-west-1").await);
        probes.set_database_up("eu-west-1", false).await;
        assert!(monitor.is_region_healthy("eu-west-1").await);

        assert!(monitor.invalidate("eu-west-1").await);
        assert!(!monitor.is_region_healthy("eu-west-1").await);
    }

    #[tokio::test]
    async fn test_get_all_region_health() {
        let (_clock, probes, monitor) = monitor();
        probes.set_region_up("ap-southeast-1", false).await;
        let all = monitor.get_all_region_health().await;
        assert_eq!(all.len(), 6);
        assert!(!all["ap-southeast-1"].is_healthy);
        assert!(all["us-west-2"].is_healthy);

        let healthy = monitor.healthy_regions().await;
        assert_eq!(healthy.len(), 5);
        assert_eq!(healthy[0], "us-east-1");
    }

    #[tokio::test]
    async fn test_nearest_prefers_closer_region() {
        let (_clock, probes, monitor) = monitor();
        probes.set_region_up("us-east-1", false).await;
        let candidates = vec!["eu-west-1".to_string(), "us-west-2".to_string(), "ap-southeast-1".to_string()];
        let nearest = monitor.get_nearest_healthy_region("us-east-1", &candidates).await;
        assert_eq!(nearest.as_deref(), Some("us-west-2"));
    }

    #[tokio::test]
    async fn test_nearest_empty_candidates() {
        let (_clock, _probes, monitor) = monitor();
        assert!(monitor.get_nearest_healthy_region("us-east-1", &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_refresher_probes_until_stopped() {
        let (_clock, probes, monitor) = monitor();
        let monitor = Arc::new(monitor);
        let refresher = monitor.clone().spawn_refresher(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(30)).await;
        probes.set_database_up("eu-central-1", false).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        refresher.stop().await;

        // Cache was refreshed in the background
        let health = monitor.check_region_health("eu-central-1").await;
        assert!(!health.database_healthy);
    }

    #[test]
    fn test_select_nearest_healthy_from_is_sticky() {
        let topology = RegionTopology::builtin();
        let evaluated = vec![health("eu-west-1", 100), health("us-east-1", 90)];
        assert_eq!(select_nearest("us-east-1", &evaluated, &topology).as_deref(), Some("us-east-1"));
    }

    #[test]
    fn test_select_nearest_closer_of_two() {
        let topology = RegionTopology::builtin();
        let evaluated = vec![health("ap-northeast-1", 100), health("eu-central-1", 100)];
        assert_eq!(select_nearest("eu-west-1", &evaluated, &topology).as_deref(), Some("eu-central-1"));
    }

    #[test]
    fn test_select_nearest_no_healthy_takes_best_score() {
        let topology = RegionTopology::builtin();
        let evaluated = vec![health("eu-west-1", 30), health("us-west-2", 60), health("ap-southeast-1", 60)];
        assert_eq!(select_nearest("us-east-1", &evaluated, &topology).as_deref(), Some("us-west-2"));
    }

    #[test]
    fn test_select_nearest_unknown_origin_takes_first_healthy() {
        let topology = RegionTopology::builtin();
        let evaluated = vec![health("ap-southeast-1", 40), health("eu-west-1", 100), health("us-west-2", 100)];
        assert_eq!(select_nearest("lab-9", &evaluated, &topology).as_deref(), Some("eu-west-1"));
    }
}
