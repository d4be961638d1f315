//! Tenant Limits
//!
//! Monthly budgets come from the tenant collaborator; per-minute limits are
//! derived from them with a 20% burst allowance over the flat average.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::config::QuotaConfig;
use super::error::QuotaError;
use super::scope::{MetricType, TimeGranularity};

/// Minutes in the 30-day accounting month
pub const MINUTES_PER_MONTH: f64 = 30.0 * 24.0 * 60.0;

/// Burst allowance applied to derived per-minute limits
pub const BURST_FACTOR: f64 = 1.2;

/// `max(1, round(monthly / minutes_per_month * 1.2))`
pub fn derive_per_minute(monthly_limit: u64) -> u64 {
    let per_minute = (monthly_limit as f64 / MINUTES_PER_MONTH * BURST_FACTOR).round();
    (per_minute as u64).max(1)
}

/// Plan as configured: only the coarse monthly budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPlan {
    pub max_concurrent_requests: u64,
    pub monthly_request_limit: u64,
    pub monthly_token_limit: u64,
}

/// Effective limits for one organization
///
/// Derived per-minute limits are private so they can only change together
/// with the monthly limits they come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaLimits {
    pub max_concurrent_requests: u64,
    monthly_request_limit: u64,
    monthly_token_limit: u64,
    derived_requests_per_minute: u64,
    derived_tokens_per_minute: u64,
}

impl QuotaLimits {
    /// Build limits from monthly budgets
    pub fn new(max_concurrent_requests: u64, monthly_request_limit: u64, monthly_token_limit: u64) -> Self {
        Self {
            max_concurrent_requests,
            monthly_request_limit,
            monthly_token_limit,
            derived_requests_per_minute: derive_per_minute(monthly_request_limit),
            derived_tokens_per_minute: derive_per_minute(monthly_token_limit),
        }
    }

    /// Replace the monthly budgets and recompute the derived limits
    pub fn set_monthly_limits(&mut self, monthly_request_limit: u64, monthly_token_limit: u64) {
        *self = Self::new(self.max_concurrent_requests, monthly_request_limit, monthly_token_limit);
    }

    pub fn monthly_request_limit(&self) -> u64 {
        self.monthly_request_limit
    }

    pub fn monthly_token_limit(&self) -> u64 {
        self.monthly_token_limit
    }

    pub fn derived_requests_per_minute(&self) -> u64 {
        self.derived_requests_per_minute
    }

    pub fn derived_tokens_per_minute(&self) -> u64 {
        self.derived_tokens_per_minute
    }

    /// Enforced limit for a metric/granularity pair; 0 means not enforced
    pub fn limit_for(&self, metric: MetricType, granularity: TimeGranularity) -> u64 {
        match (granularity, metric) {
            (TimeGranularity::Minute, MetricType::Requests) => self.derived_requests_per_minute,
            (TimeGranularity::Minute, MetricType::Tokens) => self.derived_tokens_per_minute,
            (TimeGranularity::Month, MetricType::Requests) => self.monthly_request_limit,
            (TimeGranularity::Month, MetricType::Tokens) => self.monthly_token_limit,
            _ => 0,
        }
    }
}

impl From<QuotaPlan> for QuotaLimits {
    fn from(plan: QuotaPlan) -> Self {
        Self::new(
            plan.max_concurrent_requests,
            plan.monthly_request_limit,
            plan.monthly_token_limit,
        )
    }
}

/// Source of per-organization limits
#[async_trait]
pub trait TenantLimitsProvider: Send + Sync {
    async fn get_organization_limits(&self, organization_id: &str) -> Result<QuotaLimits, QuotaError>;
}

/// Limits held in memory: per-organization plans over an optional default plan
#[derive(Debug, Default)]
pub struct StaticLimitsProvider {
    default_plan: Option<QuotaPlan>,
    plans: RwLock<HashMap<String, QuotaPlan>>,
}

impl StaticLimitsProvider {
    /// Provider that answers every organization with `default_plan`
    pub fn new(default_plan: Option<QuotaPlan>) -> Self {
        Self {
            default_plan,
            plans: RwLock::new(HashMap::new()),
        }
    }

    /// Provider built from the `[quota]` configuration section
    pub fn from_config(config: &QuotaConfig) -> Self {
        Self {
            default_plan: Some(config.default_plan),
            plans: RwLock::new(config.organization_plans.clone()),
        }
    }

    /// Install or replace an organization's plan
    pub async fn set_plan(&self, organization_id: &str, plan: QuotaPlan) {
        self.plans.write().await.insert(organization_id.to_string(), plan);
    }
}

#[async_trait]
impl TenantLimitsProvider for StaticLimitsProvider {
    async fn get_organization_limits(&self, organization_id: &str) -> Result<QuotaLimits, QuotaError> {
        let plans = self.plans.read().await;
        plans
            .get(organization_id)
            .copied()
            .or(self.default_plan)
            .map(QuotaLimits::from)
            .ok_or_else(|| QuotaError::OrganizationNotFound(organization_id.to_string()))
    }
}
