//! Quota Admission Control Module
//!
//! Decides whether a tenant's request may proceed against its usage quotas.
//!
//! # Features
//!
//! - Fixed and sliding windows evaluated atomically in the counter store
//! - Per-organization, per-user and per-virtual-key scopes
//! - Per-minute limits derived from monthly budgets
//! - Concurrent request cap checked ahead of the windows
//! - Reporting counters kept apart from enforcement
//! - Fail-open when the counter store is unavailable
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Quota Engine                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐         │
//! │  │ Concurrency │  │ Fixed /     │  │ Usage       │         │
//! │  │ Check       │  │ Sliding     │  │ Reporting   │         │
//! │  └─────────────┘  └─────────────┘  └─────────────┘         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │        Atomic Counter Store (In-Memory / Redis)      │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod limits;
#[cfg(feature = "redis-store")]
pub mod redis_store;
pub mod scope;
pub mod store;
pub mod usage;

pub use config::QuotaConfig;
pub use engine::{ConcurrencyPermit, QuotaEngine, QuotaRequest, QuotaResult};
pub use error::{QuotaError, StoreError};
pub use limits::{QuotaLimits, QuotaPlan, StaticLimitsProvider, TenantLimitsProvider};
#[cfg(feature = "redis-store")]
pub use redis_store::RedisCounterStore;
pub use scope::{MetricType, QuotaScope, TimeGranularity, WindowType};
pub use store::{AtomicCounterStore, InMemoryCounterStore, WindowOutcome, WindowStatus};
pub use usage::{UsageEntry, UsageMetrics, UsagePeriod, UsageQuery, UsageReport};
