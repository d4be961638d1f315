//! Quota Engine
//!
//! Central admission check for tenant requests.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::config::QuotaConfig;
use super::error::{QuotaError, StoreError};
use super::limits::{QuotaLimits, TenantLimitsProvider};
use super::scope::{concurrency_key, require_id, MetricType, QuotaScope, TimeGranularity, WindowType};
use super::store::{AtomicCounterStore, WindowOutcome, WindowStatus};
use super::usage::{usage_key, UsageEntry, UsageMetrics, UsagePeriod, UsageQuery, UsageReport};
use crate::clock::{deadline, SharedClock};
use crate::metrics;

/// Quota check request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRequest {
    pub metric_type: MetricType,
    pub time_granularity: TimeGranularity,
    pub window_type: WindowType,
    pub increment_by: u64,
}

impl QuotaRequest {
    /// Request for a single unit
    pub fn new(metric_type: MetricType, time_granularity: TimeGranularity, window_type: WindowType) -> Self {
        Self {
            metric_type,
            time_granularity,
            window_type,
            increment_by: 1,
        }
    }

    pub fn increment_by(mut self, amount: u64) -> Self {
        self.increment_by = amount;
        self
    }
}

/// Result of a quota check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum QuotaResult {
    /// Request may proceed; `remaining` is unknown when the quota is not
    /// enforced or the check failed open
    Allowed { remaining: Option<u64> },

    /// Window limit reached
    Throttled {
        limit: u64,
        current_usage: u64,
        window_start: chrono::DateTime<chrono::Utc>,
        window_end: chrono::DateTime<chrono::Utc>,
        retry_after: Duration,
    },

    /// Rejected outright (concurrency cap)
    Blocked { reason: String },
}

impl QuotaResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaResult::Allowed { .. })
    }

    /// Time until the request could succeed
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            QuotaResult::Throttled { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            QuotaResult::Allowed { .. } => "allowed",
            QuotaResult::Throttled { .. } => "throttled",
            QuotaResult::Blocked { .. } => "blocked",
        }
    }

    fn unenforced() -> Self {
        QuotaResult::Allowed { remaining: None }
    }
}

/// Slot in an organization's in-flight request counter
///
/// Call [`ConcurrencyPermit::release`] when the request finishes. A permit
/// dropped without release is returned from a spawned task when a Tokio
/// runtime is available; otherwise the counter TTL reclaims it.
pub struct ConcurrencyPermit {
    store: Arc<dyn AtomicCounterStore>,
    key: String,
    released: bool,
}

impl ConcurrencyPermit {
    /// Give the slot back
    pub async fn release(mut self) -> Result<(), QuotaError> {
        self.released = true;
        self.store.increment_by(&self.key, -1).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ConcurrencyPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyPermit")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = store.increment_by(&key, -1).await {
                        warn!(key = %key, error = %err, "Failed to release dropped concurrency permit");
                    }
                });
            }
            Err(_) => debug!(key = %key, "Concurrency permit dropped outside runtime; left to TTL"),
        }
    }
}

/// Quota engine
#[derive(Clone)]
pub struct QuotaEngine {
    /// Configuration
    config: Arc<RwLock<QuotaConfig>>,

    /// Shared counter store
    store: Arc<dyn AtomicCounterStore>,

    /// Tenant limits collaborator
    limits: Arc<dyn TenantLimitsProvider>,

    clock: SharedClock,
}

impl QuotaEngine {
    /// Create a new quota engine
    pub fn new(
        config: QuotaConfig,
        store: Arc<dyn AtomicCounterStore>,
        limits: Arc<dyn TenantLimitsProvider>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            store,
            limits,
            clock,
        }
    }

    /// Check an organization-wide quota
    pub async fn check_quota(&self, organization_id: &str, request: &QuotaRequest) -> Result<QuotaResult, QuotaError> {
        let scope = QuotaScope::organization(
            organization_id,
            request.metric_type,
            request.time_granularity,
            request.window_type,
        )?;
        self.check_scope(&scope, request).await
    }

    /// Check a user-scoped quota; limits come from the user's organization
    pub async fn check_user_quota(
        &self,
        organization_id: &str,
        user_id: &str,
        request: &QuotaRequest,
    ) -> Result<QuotaResult, QuotaError> {
        let scope = QuotaScope::organization(
            organization_id,
            request.metric_type,
            request.time_granularity,
            request.window_type,
        )?
        .with_user(user_id)?;
        self.check_scope(&scope, request).await
    }

    /// Check a virtual-key-scoped quota
    pub async fn check_key_quota(
        &self,
        organization_id: &str,
        virtual_key_id: &str,
        request: &QuotaRequest,
    ) -> Result<QuotaResult, QuotaError> {
        let scope = QuotaScope::organization(
            organization_id,
            request.metric_type,
            request.time_granularity,
            request.window_type,
        )?
        .with_virtual_key(virtual_key_id)?;
        self.check_scope(&scope, request).await
    }

    async fn check_scope(&self, scope: &QuotaScope, request: &QuotaRequest) -> Result<QuotaResult, QuotaError> {
        if request.increment_by == 0 {
            return Err(QuotaError::InvalidRequest("increment must be positive".to_string()));
        }

        if !self.config.read().await.enabled {
            return Ok(QuotaResult::unenforced());
        }

        let limits = self.limits.get_organization_limits(&scope.organization_id).await?;

        // Concurrency is checked outside the fail-open path
        if request.metric_type == MetricType::Requests {
            if let Some(blocked) = self.check_concurrency(&scope.organization_id, &limits).await? {
                record_decision(request.metric_type, &blocked);
                return Ok(blocked);
            }
        }

        let limit = limits.limit_for(request.metric_type, request.time_granularity);
        if limit == 0 {
            return Ok(QuotaResult::unenforced());
        }

        let key = scope.counter_key();
        let window = request.time_granularity.window();
        let result = match self.apply_window(&key, request, window, limit).await {
            Ok(outcome) => self.to_result(outcome, request.window_type, window, limit),
            Err(err) => {
                warn!(
                    organization_id = %scope.organization_id,
                    key = %key,
                    error = %err,
                    "Counter store unavailable, failing open"
                );
                metrics::QUOTA_FAIL_OPEN_TOTAL.inc();
                QuotaResult::unenforced()
            }
        };

        if let QuotaResult::Throttled { current_usage, .. } = &result {
            debug!(
                organization_id = %scope.organization_id,
                metric = %request.metric_type,
                granularity = %request.time_granularity,
                current_usage,
                limit,
                "Quota exceeded"
            );
        }
        record_decision(request.metric_type, &result);
        Ok(result)
    }

    async fn check_concurrency(
        &self,
        organization_id: &str,
        limits: &QuotaLimits,
    ) -> Result<Option<QuotaResult>, QuotaError> {
        let current = self
            .store
            .get(&concurrency_key(organization_id))
            .await?
            .unwrap_or(0)
            .max(0) as u64;

        if current >= limits.max_concurrent_requests {
            return Ok(Some(QuotaResult::Blocked {
                reason: format!(
                    "Concurrent request limit reached ({} of {})",
                    current, limits.max_concurrent_requests
                ),
            }));
        }
        Ok(None)
    }

    async fn apply_window(
        &self,
        key: &str,
        request: &QuotaRequest,
        window: Duration,
        limit: u64,
    ) -> Result<WindowOutcome, StoreError> {
        match request.window_type {
            WindowType::Fixed => {
                self.store
                    .fixed_window(key, window, request.increment_by, limit)
                    .await
            }
            WindowType::Sliding => {
                self.store
                    .sliding_window(key, window, request.increment_by, limit, self.clock.now())
                    .await
            }
        }
    }

    fn to_result(&self, outcome: WindowOutcome, window_type: WindowType, window: Duration, limit: u64) -> QuotaResult {
        if outcome.status != WindowStatus::Exceeded {
            return QuotaResult::Allowed {
                remaining: Some(limit.saturating_sub(outcome.count)),
            };
        }

        let now = self.clock.now();
        let retry_after = whole_seconds(outcome.ttl);
        let (window_start, window_end) = match window_type {
            WindowType::Fixed => {
                let end = deadline(now, outcome.ttl);
                (end - chrono::Duration::seconds(window.as_secs() as i64), end)
            }
            WindowType::Sliding => (now - chrono::Duration::seconds(window.as_secs() as i64), now),
        };

        QuotaResult::Throttled {
            limit,
            current_usage: outcome.count,
            window_start,
            window_end,
            retry_after,
        }
    }

    /// Take an in-flight request slot for the organization
    pub async fn begin_request(&self, organization_id: &str) -> Result<ConcurrencyPermit, QuotaError> {
        require_id("organization id", organization_id)?;
        let key = concurrency_key(organization_id);
        let ttl = self.config.read().await.concurrency_ttl();
        self.store.increment_by(&key, 1).await?;
        self.store.expire(&key, ttl).await?;
        Ok(ConcurrencyPermit {
            store: self.store.clone(),
            key,
            released: false,
        })
    }

    /// Record usage for reporting, independent of enforcement
    pub async fn increment_usage(&self, organization_id: &str, usage: &UsageMetrics) -> Result<(), QuotaError> {
        require_id("organization id", organization_id)?;
        if let Some(user_id) = &usage.user_id {
            require_id("user id", user_id)?;
        }
        if let Some(key_id) = &usage.virtual_key_id {
            require_id("virtual key id", key_id)?;
        }
        if usage.value == 0 {
            return Ok(());
        }

        let now = self.clock.now();
        let periods = [UsagePeriod::month_of(now), UsagePeriod::day_of(now)];
        let mut owners: Vec<(Option<&str>, Option<&str>)> = vec![(None, None)];
        if let Some(user_id) = usage.user_id.as_deref() {
            owners.push((Some(user_id), None));
        }
        if let Some(key_id) = usage.virtual_key_id.as_deref() {
            owners.push((None, Some(key_id)));
        }

        let delta = i64::try_from(usage.value).unwrap_or(i64::MAX);
        for (user_id, key_id) in owners {
            for period in &periods {
                let key = usage_key(organization_id, user_id, key_id, usage.metric_type, period);
                self.store.increment_by(&key, delta).await?;
                self.store.expire(&key, period.ttl()).await?;
            }
        }
        Ok(())
    }

    /// Read reporting counters; missing or unreadable counters report 0
    pub async fn get_usage(&self, organization_id: &str, query: &UsageQuery) -> Result<UsageReport, QuotaError> {
        require_id("organization id", organization_id)?;
        let buckets = query.buckets()?;

        let mut entries = Vec::with_capacity(buckets.len());
        for (metric, period) in buckets {
            let key = usage_key(organization_id, None, None, metric, &period);
            let value = match self.store.get(&key).await {
                Ok(value) => value.unwrap_or(0).max(0) as u64,
                Err(err) => {
                    warn!(key = %key, error = %err, "Usage counter unreadable, reporting 0");
                    0
                }
            };
            entries.push(UsageEntry {
                metric_type: metric,
                granularity: period.granularity(),
                period: period.label(),
                value,
            });
        }

        Ok(UsageReport {
            organization_id: organization_id.to_string(),
            from: query.from,
            to: query.to,
            entries,
        })
    }

    /// Administrative reset of an organization's counters for one metric
    ///
    /// Removes the organization-level enforcement counters for every
    /// granularity and window type plus the current month and day reporting
    /// counters. Returns how many keys were removed.
    pub async fn reset_usage(&self, organization_id: &str, metric: MetricType) -> Result<u64, QuotaError> {
        require_id("organization id", organization_id)?;

        let mut keys = Vec::new();
        for granularity in TimeGranularity::ALL {
            for window_type in WindowType::ALL {
                keys.push(QuotaScope::organization(organization_id, metric, granularity, window_type)?.counter_key());
            }
        }
        let now = self.clock.now();
        for period in [UsagePeriod::month_of(now), UsagePeriod::day_of(now)] {
            keys.push(usage_key(organization_id, None, None, metric, &period));
        }

        let mut removed = 0;
        for key in &keys {
            if self.store.delete(key).await? {
                removed += 1;
            }
        }

        info!(organization_id, metric = %metric, removed, "Quota usage reset");
        Ok(removed)
    }

    /// Update configuration
    pub async fn update_config(&self, config: QuotaConfig) {
        let mut current = self.config.write().await;
        *current = config;
    }

    /// Get current configuration
    pub async fn get_config(&self) -> QuotaConfig {
        self.config.read().await.clone()
    }

    /// Counter store (for diagnostics)
    pub fn store(&self) -> &Arc<dyn AtomicCounterStore> {
        &self.store
    }
}

fn whole_seconds(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_millis().div_ceil(1000) as u64)
}

fn record_decision(metric: MetricType, result: &QuotaResult) {
    metrics::QUOTA_DECISIONS_TOTAL
        .with_label_values(&[metric.as_str(), result.label()])
        .inc();
}
