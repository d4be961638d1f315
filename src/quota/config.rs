//! Quota Configuration
//!
//! Configuration for quota admission control.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::limits::QuotaPlan;

/// Default plan limits
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: u64 = 100;
pub const DEFAULT_MONTHLY_REQUEST_LIMIT: u64 = 1_000_000;
pub const DEFAULT_MONTHLY_TOKEN_LIMIT: u64 = 100_000_000;

/// Reporting counter lifetimes
pub const MONTHLY_USAGE_TTL_SECS: u64 = 31 * 24 * 3600;
pub const DAILY_USAGE_TTL_SECS: u64 = 2 * 24 * 3600;

/// Lifetime of the in-flight request counter if permits leak
pub const DEFAULT_CONCURRENCY_TTL_SECS: u64 = 300;

/// Quota configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Enable quota enforcement
    pub enabled: bool,

    /// Plan applied to organizations without an explicit plan
    pub default_plan: QuotaPlan,

    /// Per-organization plans
    pub organization_plans: HashMap<String, QuotaPlan>,

    /// Expiry of the concurrency counter, refreshed on every admitted request
    pub concurrency_ttl_secs: u64,

    /// Redis URL for the shared counter store (in-process store when unset)
    pub redis_url: Option<String>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_plan: QuotaPlan {
                max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
                monthly_request_limit: DEFAULT_MONTHLY_REQUEST_LIMIT,
                monthly_token_limit: DEFAULT_MONTHLY_TOKEN_LIMIT,
            },
            organization_plans: HashMap::new(),
            concurrency_ttl_secs: DEFAULT_CONCURRENCY_TTL_SECS,
            redis_url: None,
        }
    }
}

impl QuotaConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Overlay environment variables on top of this configuration
    pub fn apply_env(mut self) -> Self {
        if let Ok(val) = std::env::var("REGIONGUARD_QUOTA_ENABLED") {
            self.enabled = val.parse().unwrap_or(self.enabled);
        }

        if let Ok(val) = std::env::var("REGIONGUARD_MAX_CONCURRENT_REQUESTS") {
            if let Ok(limit) = val.parse() {
                self.default_plan.max_concurrent_requests = limit;
            }
        }

        if let Ok(val) = std::env::var("REGIONGUARD_MONTHLY_REQUEST_LIMIT") {
            if let Ok(limit) = val.parse() {
                self.default_plan.monthly_request_limit = limit;
            }
        }

        if let Ok(val) = std::env::var("REGIONGUARD_MONTHLY_TOKEN_LIMIT") {
            if let Ok(limit) = val.parse() {
                self.default_plan.monthly_token_limit = limit;
            }
        }

        if let Ok(url) = std::env::var("REGIONGUARD_REDIS_URL") {
            if !url.is_empty() {
                self.redis_url = Some(url);
            }
        }

        self
    }

    /// Concurrency counter expiry
    pub fn concurrency_ttl(&self) -> Duration {
        Duration::from_secs(self.concurrency_ttl_secs)
    }

    /// Disable quota enforcement (for testing)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}
