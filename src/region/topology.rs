//! Region Topology
//!
//! Region coordinates and endpoints. The table is configuration: it is held
//! behind a [`TopologyHandle`] and can be swapped at runtime without
//! restarting the monitor.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::error::TopologyError;

/// Mean Earth radius used for great-circle distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Geographic coordinates in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Haversine great-circle distance in kilometres
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }
}

/// One deployable region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSite {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,

    /// `host:port` of the region's primary datastore, used by the dependency probe
    #[serde(default)]
    pub database_endpoint: Option<String>,
}

impl RegionSite {
    pub fn new(name: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.to_string(),
            latitude,
            longitude,
            database_endpoint: None,
        }
    }

    pub fn with_database_endpoint(mut self, endpoint: &str) -> Self {
        self.database_endpoint = Some(endpoint.to_string());
        self
    }

    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Default region table
pub fn builtin_sites() -> Vec<RegionSite> {
    vec![
        RegionSite::new("us-east-1", 39.0438, -77.4874),
        RegionSite::new("us-west-2", 45.5946, -121.1787),
        RegionSite::new("eu-west-1", 53.3498, -6.2603),
        RegionSite::new("eu-central-1", 50.1109, 8.6821),
        RegionSite::new("ap-southeast-1", 1.3521, 103.8198),
        RegionSite::new("ap-northeast-1", 35.6762, 139.6503),
    ]
}

/// Validated, ordered region table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionTopology {
    sites: Vec<RegionSite>,
}

impl RegionTopology {
    /// Validate and build a topology; order is preserved
    pub fn new(sites: Vec<RegionSite>) -> Result<Self, TopologyError> {
        if sites.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut seen = HashSet::new();
        for site in &sites {
            if site.name.trim().is_empty() {
                return Err(TopologyError::BlankName);
            }
            if !seen.insert(site.name.as_str()) {
                return Err(TopologyError::Duplicate(site.name.clone()));
            }
            let lat_ok = site.latitude.is_finite() && (-90.0..=90.0).contains(&site.latitude);
            let lon_ok = site.longitude.is_finite() && (-180.0..=180.0).contains(&site.longitude);
            if !lat_ok || !lon_ok {
                return Err(TopologyError::InvalidCoordinates {
                    region: site.name.clone(),
                    latitude: site.latitude,
                    longitude: site.longitude,
                });
            }
        }

        Ok(Self { sites })
    }

    pub fn builtin() -> Self {
        Self { sites: builtin_sites() }
    }

    /// Region names in configured order
    pub fn regions(&self) -> Vec<String> {
        self.sites.iter().map(|s| s.name.clone()).collect()
    }

    pub fn sites(&self) -> &[RegionSite] {
        &self.sites
    }

    pub fn get(&self, region: &str) -> Option<&RegionSite> {
        self.sites.iter().find(|s| s.name == region)
    }

    pub fn contains(&self, region: &str) -> bool {
        self.get(region).is_some()
    }

    /// Coordinates of a region, `None` when unknown
    pub fn location(&self, region: &str) -> Option<GeoPoint> {
        self.get(region).map(RegionSite::location)
    }
}

impl Default for RegionTopology {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Shared, reloadable topology
#[derive(Debug, Clone, Default)]
pub struct TopologyHandle {
    current: Arc<RwLock<Arc<RegionTopology>>>,
}

impl TopologyHandle {
    pub fn new(topology: RegionTopology) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(topology))),
        }
    }

    /// Current table; stays valid across reloads
    pub async fn snapshot(&self) -> Arc<RegionTopology> {
        self.current.read().await.clone()
    }

    /// Replace the table
    pub async fn reload(&self, topology: RegionTopology) {
        let regions = topology.sites.len();
        *self.current.write().await = Arc::new(topology);
        info!(regions, "Region topology reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_zero_for_same_point() {
        let p = GeoPoint::new(39.0438, -77.4874);
        assert!(p.distance_km(&p).abs() < 1e-9);
    }

    #[test]
    fn test_distance_known_pair() {
        // Virginia to Dublin is roughly 5,450 km
        let topology = RegionTopology::builtin();
        let us = topology.location("us-east-1").unwrap();
        let eu = topology.location("eu-west-1").unwrap();
        let d = us.distance_km(&eu);
        assert!((5300.0..5600.0).contains(&d), "distance was {}", d);
        assert!((d - eu.distance_km(&us)).abs() < 1e-6);
    }

    #[test]
    fn test_antipodal_points() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 180.0);
        let half_circumference = std::f64::consts::PI * EARTH_RADIUS_KM;
        assert!((a.distance_km(&b) - half_circumference).abs() < 1e-6);
    }

    #[test]
    fn test_builtin_table() {
        let topology = RegionTopology::builtin();
        assert_eq!(topology.regions().len(), 6);
        assert!(topology.contains("ap-northeast-1"));
        assert!(topology.location("mars-north-1").is_none());
    }

    #[test]
    fn test_validation() {
        assert!(matches!(RegionTopology::new(vec![]), Err(TopologyError::Empty)));
        assert!(matches!(
            RegionTopology::new(vec![RegionSite::new("a", 0.0, 0.0), RegionSite::new("a", 1.0, 1.0)]),
            Err(TopologyError::Duplicate(_))
        ));
        assert!(matches!(
            RegionTopology::new(vec![RegionSite::new("a", 91.0, 0.0)]),
            Err(TopologyError::InvalidCoordinates { .. })
        ));
        assert!(matches!(
            RegionTopology::new(vec![RegionSite::new(" ", 0.0, 0.0)]),
            Err(TopologyError::BlankName)
        ));
    }

    #[tokio::test]
    async fn test_reload_swaps_table() {
        let handle = TopologyHandle::new(RegionTopology::builtin());
        let before = handle.snapshot().await;

        let replacement = RegionTopology::new(vec![RegionSite::new("lab-1", 10.0, 10.0)]).unwrap();
        handle.reload(replacement).await;

        assert_eq!(handle.snapshot().await.regions(), vec!["lab-1".to_string()]);
        // Earlier snapshots are unaffected
        assert_eq!(before.regions().len(), 6);
    }
}
