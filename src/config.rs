// Configuration File Support
//
// This module provides configuration file parsing for the regionguard control plane.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/regionguard/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::failover::{DirectoryConfig, FailoverConfig};
use crate::quota::QuotaConfig;
use crate::region::{HealthConfig, RegionTopology, TopologyConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Quota admission configuration
    pub quota: QuotaConfig,

    /// Region health monitoring configuration
    pub health: HealthConfig,

    /// Failover policy configuration
    pub failover: FailoverConfig,

    /// Region table
    pub topology: TopologyConfig,

    /// Organizations and users served by the in-memory directory
    pub directory: DirectoryConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Metrics and health HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether `serve` starts the HTTP server
    pub enabled: bool,

    /// Address to bind
    pub bind_address: String,

    /// Port for metrics server
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

impl MetricsConfig {
    /// Listen address for the HTTP server
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .with_context(|| format!("Invalid metrics bind address: {}", self.bind_address))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the resulting configuration does not validate.
    /// If the config file does not exist, returns default configuration
    /// with environment overrides applied.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            let config = Self::default().apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        // Apply environment variable overrides
        let config = config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/regionguard/config.toml` on Linux/Mac
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "regionguard", "RegionGuard") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("regionguard").join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - REGIONGUARD_LOG_LEVEL
    /// - REGIONGUARD_LOG_FORMAT
    /// - REGIONGUARD_HEALTH_CACHE_TTL_SECS
    /// - REGIONGUARD_HEALTH_REFRESH_SECS
    /// - REGIONGUARD_LIVE_PROBES
    /// - REGIONGUARD_CONSENT_URL
    /// - REGIONGUARD_METRICS_ENABLED
    /// - REGIONGUARD_METRICS_PORT
    /// - the quota variables read by [`QuotaConfig::apply_env`]
    fn apply_env_overrides(mut self) -> Self {
        // Logging overrides
        if let Ok(level) = std::env::var("REGIONGUARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("REGIONGUARD_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Health overrides
        if let Ok(ttl) = std::env::var("REGIONGUARD_HEALTH_CACHE_TTL_SECS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.health.cache_ttl_secs = ttl;
            }
        }
        if let Ok(refresh) = std::env::var("REGIONGUARD_HEALTH_REFRESH_SECS") {
            if let Ok(refresh) = refresh.parse::<u64>() {
                self.health.refresh_interval_secs = refresh;
            }
        }
        if let Ok(live) = std::env::var("REGIONGUARD_LIVE_PROBES") {
            self.health.live_probes = live.parse().unwrap_or(self.health.live_probes);
        }

        // Failover overrides
        if let Ok(url) = std::env::var("REGIONGUARD_CONSENT_URL") {
            if !url.is_empty() {
                self.failover.consent_url = url;
            }
        }

        // Metrics overrides
        if let Ok(enabled) = std::env::var("REGIONGUARD_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }
        if let Ok(port) = std::env::var("REGIONGUARD_METRICS_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.metrics.port = port;
            }
        }

        self.quota = self.quota.apply_env();
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        // Validate quota configuration
        if self.quota.concurrency_ttl_secs == 0 {
            anyhow::bail!("Concurrency counter TTL must be > 0");
        }
        if let Some(url) = &self.quota.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                anyhow::bail!("Redis URL must start with redis:// or rediss://, got {}", url);
            }
        }

        // Validate health thresholds
        let health = &self.health;
        if health.healthy_score > 100 || health.routable_score > 100 {
            anyhow::bail!("Health score thresholds must be <= 100");
        }
        if health.degraded_score > health.healthy_score {
            anyhow::bail!(
                "Degraded threshold ({}) must not exceed healthy threshold ({})",
                health.degraded_score,
                health.healthy_score
            );
        }
        if health.database_threshold_ms == 0 || health.cache_threshold_ms == 0 {
            anyhow::bail!("Probe latency thresholds must be > 0");
        }
        if health.provider_timeout_secs == 0 {
            anyhow::bail!("Provider timeout must be > 0");
        }
        let mut providers = HashSet::new();
        for provider in &health.providers {
            if provider.name.trim().is_empty() {
                anyhow::bail!("Provider with empty name");
            }
            if !providers.insert(provider.name.as_str()) {
                anyhow::bail!("Provider '{}' configured more than once", provider.name);
            }
        }

        // Validate region table
        let topology = RegionTopology::new(self.topology.regions.clone()).context("Invalid region topology")?;
        if self.health.live_probes {
            if let Some(site) = topology.sites().iter().find(|site| site.database_endpoint.is_none()) {
                anyhow::bail!(
                    "live_probes = true requires a database_endpoint for every region; '{}' has none",
                    site.name
                );
            }
        }

        // Validate failover configuration
        if self.failover.default_regions.is_empty() {
            anyhow::bail!("Failover default regions must not be empty");
        }
        for region in &self.failover.default_regions {
            if !topology.contains(region) {
                anyhow::bail!("Failover default region '{}' is not in the region table", region);
            }
        }
        reqwest::Url::parse(&self.failover.consent_url)
            .with_context(|| format!("Invalid consent URL: {}", self.failover.consent_url))?;

        // Validate directory seed
        for organization in &self.directory.organizations {
            if organization.organization_id.trim().is_empty() {
                anyhow::bail!("Directory organization with empty id");
            }
        }
        for user in &self.directory.users {
            if user.organization_id.trim().is_empty() || user.user_id.trim().is_empty() {
                anyhow::bail!("Directory user with empty organization or user id");
            }
        }

        // Validate metrics configuration
        if self.metrics.port == 0 {
            anyhow::bail!("Metrics port must be > 0");
        }
        self.metrics.socket_addr()?;

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
