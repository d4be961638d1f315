//! Region Module Error Types

use crate::quota::StoreError;

/// Failure of a single health probe
///
/// Probe errors never leave the monitor; they are folded into the region's
/// issues list.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Probe did not finish within its bound
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// Target could not be reached
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Region has no endpoint to probe
    #[error("no endpoint configured for region {0}")]
    NotConfigured(String),

    /// Value written to the cache did not read back
    #[error("probe value mismatch (wrote {written}, read {read:?})")]
    Mismatch { written: i64, read: Option<i64> },

    /// Provider status request failed
    #[error("status request failed: {0}")]
    Http(String),

    /// Cache probe backend failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout(0)
        } else {
            ProbeError::Http(err.to_string())
        }
    }
}

/// Invalid region topology
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("Region topology is empty")]
    Empty,

    #[error("Region name must not be blank")]
    BlankName,

    #[error("Region {0} is listed more than once")]
    Duplicate(String),

    #[error("Region {region} has invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates {
        region: String,
        latitude: f64,
        longitude: f64,
    },
}
