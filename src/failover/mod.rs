//! Region Failover Module
//!
//! Decides which region serves a tenant when its primary degrades and
//! executes the move under residency and consent policy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Failover Decision Engine                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐         │
//! │  │ Region      │  │ Org / User  │  │ Compliance  │         │
//! │  │ Health      │  │ Directory   │  │ Log         │         │
//! │  └─────────────┘  └─────────────┘  └─────────────┘         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod compliance;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;

pub use compliance::{ComplianceLogSink, InMemoryComplianceLog, LegalBasis, TracingComplianceLog, TransferRecord};
pub use config::{DirectoryConfig, FailoverConfig};
pub use directory::{InMemoryDirectory, OrganizationDirectory, OrganizationPolicy, UserDirectory, UserResidency};
pub use engine::{FailoverDecision, FailoverDecisionEngine, FailoverResult};
pub use error::{ComplianceError, DirectoryError, FailoverError};
