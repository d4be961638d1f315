//! Failover Configuration

use serde::{Deserialize, Serialize};

use super::directory::{OrganizationPolicy, UserResidency};

/// Regions offered to organizations that configure none
pub const DEFAULT_FAILOVER_REGIONS: [&str; 3] = ["us-east-1", "eu-west-1", "ap-southeast-1"];

/// Consent page used when none is configured
pub const DEFAULT_CONSENT_URL: &str = "https://console.regionguard.dev/consent/cross-border";

/// Failover configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Candidate regions for organizations without their own list
    pub default_regions: Vec<String>,

    /// Consent page; `from` and `to` query parameters are appended
    pub consent_url: String,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            default_regions: DEFAULT_FAILOVER_REGIONS.iter().map(|r| r.to_string()).collect(),
            consent_url: DEFAULT_CONSENT_URL.to_string(),
        }
    }
}

/// Seed data for the in-memory directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub organizations: Vec<OrganizationPolicy>,
    pub users: Vec<UserResidency>,
}
