//! Regional Health Module
//!
//! Scores each region from live signals and picks the nearest routable
//! region when the preferred one degrades.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Region Health Monitor                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐         │
//! │  │ Datastore   │  │ Cache       │  │ Provider    │         │
//! │  │ Probe       │  │ Probe       │  │ Status      │         │
//! │  └─────────────┘  └─────────────┘  └─────────────┘         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐  ┌──────────────────────────┐    │
//! │  │ Health Cache (TTL)   │  │ Topology (reloadable)    │    │
//! │  └──────────────────────┘  └──────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod monitor;
pub mod probe;
pub mod topology;

pub use config::{HealthConfig, ProviderConfig, TopologyConfig};
pub use error::{ProbeError, TopologyError};
pub use health::{compute_health_score, HealthStatus, HealthThresholds, ProviderStatus, RegionHealth};
pub use monitor::{select_nearest, HealthProbes, HealthRefresher, RegionHealthMonitor};
pub use probe::{
    CacheProbe, CounterStoreCacheProbe, DependencyProbe, HttpProviderProbe, ProviderStatusProbe, StaticProbes,
    TcpDependencyProbe,
};
pub use topology::{GeoPoint, RegionSite, RegionTopology, TopologyHandle};
