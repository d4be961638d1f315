//! Usage Reporting
//!
//! Reporting counters are separate from enforcement counters: every recorded
//! usage increments a monthly and a daily rolling counter whatever the
//! enforcement decision was.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::config::{DAILY_USAGE_TTL_SECS, MONTHLY_USAGE_TTL_SECS};
use super::error::QuotaError;
use super::scope::{escape, optional_segment, MetricType, TimeGranularity};

/// Upper bound on buckets enumerated by one report
pub const MAX_REPORT_BUCKETS: usize = 400;

/// Calendar bucket of a reporting counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsagePeriod {
    Month { year: i32, month: u32 },
    Day(NaiveDate),
}

impl UsagePeriod {
    pub fn month_of(at: DateTime<Utc>) -> Self {
        UsagePeriod::Month {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn day_of(at: DateTime<Utc>) -> Self {
        UsagePeriod::Day(at.date_naive())
    }

    pub fn granularity(&self) -> TimeGranularity {
        match self {
            UsagePeriod::Month { .. } => TimeGranularity::Month,
            UsagePeriod::Day(_) => TimeGranularity::Day,
        }
    }

    /// `2026-10` or `2026-10-19`
    pub fn label(&self) -> String {
        match self {
            UsagePeriod::Month { year, month } => format!("{:04}-{:02}", year, month),
            UsagePeriod::Day(date) => date.format("%Y-%m-%d").to_string(),
        }
    }

    /// Rolling lifetime of the counter
    pub fn ttl(&self) -> Duration {
        match self {
            UsagePeriod::Month { .. } => Duration::from_secs(MONTHLY_USAGE_TTL_SECS),
            UsagePeriod::Day(_) => Duration::from_secs(DAILY_USAGE_TTL_SECS),
        }
    }

    /// Month buckets touched by `[from, to]`
    pub fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<UsagePeriod> {
        let (mut year, mut month) = (from.year(), from.month());
        let end = (to.year(), to.month());
        let mut periods = Vec::new();
        while (year, month) <= end && periods.len() < MAX_REPORT_BUCKETS {
            periods.push(UsagePeriod::Month { year, month });
            if month == 12 {
                year += 1;
                month = 1;
            } else {
                month += 1;
            }
        }
        periods
    }

    /// Day buckets touched by `[from, to]`
    pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<UsagePeriod> {
        let end = to.date_naive();
        let mut day = Some(from.date_naive());
        let mut periods = Vec::new();
        while let Some(d) = day {
            if d > end || periods.len() >= MAX_REPORT_BUCKETS {
                break;
            }
            periods.push(UsagePeriod::Day(d));
            day = d.succ_opt();
        }
        periods
    }
}

/// Store key of a reporting counter
pub fn usage_key(
    organization_id: &str,
    user_id: Option<&str>,
    virtual_key_id: Option<&str>,
    metric: MetricType,
    period: &UsagePeriod,
) -> String {
    format!(
        "usage:{}:{}:{}:{}:{}:{}",
        escape(organization_id),
        optional_segment("u", user_id),
        optional_segment("k", virtual_key_id),
        metric,
        period.granularity(),
        period.label(),
    )
}

/// Usage to record against an organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub metric_type: MetricType,
    pub value: u64,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub virtual_key_id: Option<String>,
}

impl UsageMetrics {
    pub fn new(metric_type: MetricType, value: u64) -> Self {
        Self {
            metric_type,
            value,
            user_id: None,
            virtual_key_id: None,
        }
    }

    pub fn for_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn for_virtual_key(mut self, virtual_key_id: &str) -> Self {
        self.virtual_key_id = Some(virtual_key_id.to_string());
        self
    }
}

/// Usage report query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default)]
    pub metric_type: Option<MetricType>,
    #[serde(default)]
    pub granularity: Option<TimeGranularity>,
}

impl UsageQuery {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            metric_type: None,
            granularity: None,
        }
    }

    pub fn metric(mut self, metric_type: MetricType) -> Self {
        self.metric_type = Some(metric_type);
        self
    }

    pub fn granularity(mut self, granularity: TimeGranularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    /// Every (metric, bucket) pair the report must contain
    pub fn buckets(&self) -> Result<Vec<(MetricType, UsagePeriod)>, QuotaError> {
        if self.from > self.to {
            return Err(QuotaError::InvalidRequest(
                "usage query starts after it ends".to_string(),
            ));
        }

        let metrics: Vec<MetricType> = match self.metric_type {
            Some(metric) => vec![metric],
            None => MetricType::BUDGETED.to_vec(),
        };

        let periods = match self.granularity {
            Some(TimeGranularity::Month) => UsagePeriod::months_between(self.from, self.to),
            Some(TimeGranularity::Day) => UsagePeriod::days_between(self.from, self.to),
            Some(other) => {
                return Err(QuotaError::InvalidRequest(format!(
                    "usage is reported per day or per month, not per {}",
                    other
                )))
            }
            None => {
                let mut all = UsagePeriod::months_between(self.from, self.to);
                all.extend(UsagePeriod::days_between(self.from, self.to));
                all
            }
        };

        Ok(metrics
            .into_iter()
            .flat_map(|m| periods.iter().map(move |p| (m, *p)))
            .collect())
    }
}

/// One reported counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub metric_type: MetricType,
    pub granularity: TimeGranularity,
    pub period: String,
    pub value: u64,
}

/// Usage report for one organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub organization_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub entries: Vec<UsageEntry>,
}

impl UsageReport {
    /// Sum of one metric at one granularity
    pub fn total(&self, metric: MetricType, granularity: TimeGranularity) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.metric_type == metric && e.granularity == granularity)
            .map(|e| e.value)
            .sum()
    }

    /// Value of a single bucket, 0 when absent
    pub fn value(&self, metric: MetricType, period: &UsagePeriod) -> u64 {
        let label = period.label();
        self.entries
            .iter()
            .find(|e| {
                e.metric_type == metric && e.granularity == period.granularity() && e.period == label
            })
            .map(|e| e.value)
            .unwrap_or(0)
    }
}
