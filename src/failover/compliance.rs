//! Compliance Log
//!
//! Every executed failover that moves a tenant's traffic to another region
//! leaves a transfer record naming its legal basis.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::error::ComplianceError;

/// Legal basis for processing data outside the residency region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegalBasis {
    /// User gave cross-border consent
    Consent,
    /// Transfer needed to keep the service running
    Necessity,
}

impl fmt::Display for LegalBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegalBasis::Consent => write!(f, "consent"),
            LegalBasis::Necessity => write!(f, "necessity"),
        }
    }
}

/// Region transfer entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: Uuid,
    pub organization_id: String,
    pub user_id: Option<String>,
    pub from_region: String,
    pub to_region: String,
    pub legal_basis: LegalBasis,
    pub timestamp: DateTime<Utc>,
}

impl TransferRecord {
    pub fn new(
        organization_id: &str,
        user_id: Option<&str>,
        from_region: &str,
        to_region: &str,
        legal_basis: LegalBasis,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: organization_id.to_string(),
            user_id: user_id.map(str::to_string),
            from_region: from_region.to_string(),
            to_region: to_region.to_string(),
            legal_basis,
            timestamp,
        }
    }
}

/// Destination of transfer records
#[async_trait]
pub trait ComplianceLogSink: Send + Sync {
    async fn record_transfer(&self, record: TransferRecord) -> Result<(), ComplianceError>;
}

/// Sink keeping records in memory
#[derive(Debug, Default)]
pub struct InMemoryComplianceLog {
    records: RwLock<Vec<TransferRecord>>,
}

impl InMemoryComplianceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<TransferRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl ComplianceLogSink for InMemoryComplianceLog {
    async fn record_transfer(&self, record: TransferRecord) -> Result<(), ComplianceError> {
        self.records.write().await.push(record);
        Ok(())
    }
}

/// Sink emitting each record as a structured log event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingComplianceLog;

#[async_trait]
impl ComplianceLogSink for TracingComplianceLog {
    async fn record_transfer(&self, record: TransferRecord) -> Result<(), ComplianceError> {
        info!(
            target: "regionguard::compliance",
            id = %record.id,
            organization_id = %record.organization_id,
            user_id = record.user_id.as_deref().unwrap_or("-"),
            from = %record.from_region,
            to = %record.to_region,
            legal_basis = %record.legal_basis,
            timestamp = %record.timestamp.to_rfc3339(),
            "Cross-region transfer recorded"
        );
        Ok(())
    }
}
