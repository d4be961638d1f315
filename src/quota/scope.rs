//! Quota Scopes and Counter Keys
//!
//! A [`QuotaScope`] names the counter a quota check runs against. Keys are
//! derived so that two different scopes can never map to the same store key,
//! whatever characters the identifiers contain.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::error::QuotaError;

/// Metered quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Inbound API requests
    Requests,
    /// Model tokens (prompt + completion)
    Tokens,
    /// Generated images
    Images,
}

impl MetricType {
    /// Metrics that carry monthly budgets
    pub const BUDGETED: [MetricType; 2] = [MetricType::Requests, MetricType::Tokens];

    /// Stable identifier used in keys and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Requests => "requests",
            MetricType::Tokens => "tokens",
            MetricType::Images => "images",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "requests" => Ok(MetricType::Requests),
            "tokens" => Ok(MetricType::Tokens),
            "images" => Ok(MetricType::Images),
            other => Err(format!("unknown metric type: {}", other)),
        }
    }
}

/// Length of a quota window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGranularity {
    Minute,
    Hour,
    Day,
    Month,
}

impl TimeGranularity {
    pub const ALL: [TimeGranularity; 4] = [
        TimeGranularity::Minute,
        TimeGranularity::Hour,
        TimeGranularity::Day,
        TimeGranularity::Month,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGranularity::Minute => "minute",
            TimeGranularity::Hour => "hour",
            TimeGranularity::Day => "day",
            TimeGranularity::Month => "month",
        }
    }

    /// Window length; a month is 30 days
    pub fn window(&self) -> Duration {
        match self {
            TimeGranularity::Minute => Duration::from_secs(60),
            TimeGranularity::Hour => Duration::from_secs(3600),
            TimeGranularity::Day => Duration::from_secs(86_400),
            TimeGranularity::Month => Duration::from_secs(30 * 86_400),
        }
    }
}

impl fmt::Display for TimeGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minute" => Ok(TimeGranularity::Minute),
            "hour" => Ok(TimeGranularity::Hour),
            "day" => Ok(TimeGranularity::Day),
            "month" => Ok(TimeGranularity::Month),
            other => Err(format!("unknown time granularity: {}", other)),
        }
    }
}

/// Windowing algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    /// Single counter that resets when its TTL lapses
    Fixed,
    /// Rolling count over timestamped entries
    Sliding,
}

impl WindowType {
    pub const ALL: [WindowType; 2] = [WindowType::Fixed, WindowType::Sliding];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowType::Fixed => "fixed",
            WindowType::Sliding => "sliding",
        }
    }
}

impl fmt::Display for WindowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(WindowType::Fixed),
            "sliding" => Ok(WindowType::Sliding),
            other => Err(format!("unknown window type: {}", other)),
        }
    }
}

/// Composite identity a quota counter is tracked against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotaScope {
    pub organization_id: String,
    pub user_id: Option<String>,
    pub virtual_key_id: Option<String>,
    pub metric_type: MetricType,
    pub time_granularity: TimeGranularity,
    pub window_type: WindowType,
}

impl QuotaScope {
    /// Organization-wide scope
    pub fn organization(
        organization_id: &str,
        metric_type: MetricType,
        time_granularity: TimeGranularity,
        window_type: WindowType,
    ) -> Result<Self, QuotaError> {
        require_id("organization id", organization_id)?;
        Ok(Self {
            organization_id: organization_id.to_string(),
            user_id: None,
            virtual_key_id: None,
            metric_type,
            time_granularity,
            window_type,
        })
    }

    /// Narrow the scope to one user
    pub fn with_user(mut self, user_id: &str) -> Result<Self, QuotaError> {
        require_id("user id", user_id)?;
        self.user_id = Some(user_id.to_string());
        Ok(self)
    }

    /// Narrow the scope to one virtual key
    pub fn with_virtual_key(mut self, virtual_key_id: &str) -> Result<Self, QuotaError> {
        require_id("virtual key id", virtual_key_id)?;
        self.virtual_key_id = Some(virtual_key_id.to_string());
        Ok(self)
    }

    /// Store key of the enforcement counter
    pub fn counter_key(&self) -> String {
        format!(
            "quota:{}:{}:{}:{}:{}:{}",
            escape(&self.organization_id),
            optional_segment("u", self.user_id.as_deref()),
            optional_segment("k", self.virtual_key_id.as_deref()),
            self.metric_type,
            self.time_granularity,
            self.window_type,
        )
    }
}

/// Store key of an organization's in-flight request counter
pub fn concurrency_key(organization_id: &str) -> String {
    format!("concurrency:{}", escape(organization_id))
}

pub(crate) fn require_id(what: &str, value: &str) -> Result<(), QuotaError> {
    if value.trim().is_empty() {
        return Err(QuotaError::InvalidRequest(format!("{} must not be blank", what)));
    }
    Ok(())
}

/// Escape the key separator so identifiers cannot forge extra segments
pub(crate) fn escape(id: &str) -> Cow<'_, str> {
    if id.contains(['%', ':']) {
        Cow::Owned(id.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(id)
    }
}

/// `tag` when absent, `tag=<escaped>` when present
pub(crate) fn optional_segment(tag: &str, value: Option<&str>) -> String {
    match value {
        Some(v) => format!("{}={}", tag, escape(v)),
        None => tag.to_string(),
    }
}
