// Prometheus metrics for the regionguard control plane
//
// Exposes metrics on /metrics HTTP endpoint:
// - Quota decisions by metric and outcome (counter)
// - Fail-open quota checks (counter)
// - Region health score and routability (gauge)
// - Region health check duration (histogram)
// - Health cache hits (counter)
// - Failover decisions and executions (counter)

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Quota metrics
    pub static ref QUOTA_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("quota_decisions_total", "Quota checks by metric type and decision"),
        &["metric", "decision"]
    ).expect("Failed to create quota decisions metric");

    pub static ref QUOTA_FAIL_OPEN_TOTAL: IntCounter = IntCounter::new(
        "quota_fail_open_total",
        "Quota checks allowed because the counter store failed"
    ).expect("Failed to create quota fail-open metric");

    // Region health metrics
    pub static ref REGION_HEALTH_SCORE: IntGaugeVec = IntGaugeVec::new(
        prometheus::Opts::new("region_health_score", "Latest health score per region (0-100)"),
        &["region"]
    ).expect("Failed to create region health score metric");

    pub static ref REGION_HEALTHY: IntGaugeVec = IntGaugeVec::new(
        prometheus::Opts::new("region_healthy", "1 when the region is routable, 0 otherwise"),
        &["region"]
    ).expect("Failed to create region healthy metric");

    pub static ref HEALTH_CHECK_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("region_health_check_duration_seconds", "Duration of uncached region health checks"),
        &["region"]
    ).expect("Failed to create health check duration metric");

    pub static ref HEALTH_CACHE_HITS_TOTAL: IntCounter = IntCounter::new(
        "region_health_cache_hits_total",
        "Region health checks served from cache"
    ).expect("Failed to create health cache hits metric");

    // Failover metrics
    pub static ref FAILOVER_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("failover_decisions_total", "Region selections by kind"),
        &["kind"]
    ).expect("Failed to create failover decisions metric");

    pub static ref FAILOVER_EXECUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("failover_executions_total", "Executed failovers by outcome"),
        &["outcome"]
    ).expect("Failed to create failover executions metric");
}

fn register(collector: Box<dyn prometheus::core::Collector>) -> prometheus::Result<()> {
    match REGISTRY.register(collector) {
        Err(prometheus::Error::AlreadyReg) => Ok(()),
        other => other,
    }
}

/// Initialize metrics registry; safe to call more than once
pub fn init() -> prometheus::Result<()> {
    register(Box::new(QUOTA_DECISIONS_TOTAL.clone()))?;
    register(Box::new(QUOTA_FAIL_OPEN_TOTAL.clone()))?;
    register(Box::new(REGION_HEALTH_SCORE.clone()))?;
    register(Box::new(REGION_HEALTHY.clone()))?;
    register(Box::new(HEALTH_CHECK_DURATION_SECONDS.clone()))?;
    register(Box::new(HEALTH_CACHE_HITS_TOTAL.clone()))?;
    register(Box::new(FAILOVER_DECISIONS_TOTAL.clone()))?;
    register(Box::new(FAILOVER_EXECUTIONS_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
