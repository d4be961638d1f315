//! RegionGuard Control Plane Library
//!
//! This library provides the core of the RegionGuard control plane:
//! per-tenant quota admission, region health monitoring and regional
//! failover under data residency policy.

pub mod clock;
pub mod config;
pub mod control_plane;
pub mod failover;
pub mod logging;
pub mod metrics;
pub mod metrics_server;
pub mod quota;
pub mod region;

pub use config::Config;
pub use control_plane::ControlPlane;
