//! Failover Decision Engine
//!
//! Chooses the region serving a tenant and executes region moves under the
//! tenant's residency and consent policy.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::compliance::{ComplianceLogSink, LegalBasis, TransferRecord};
use super::config::FailoverConfig;
use super::directory::{OrganizationDirectory, OrganizationPolicy, UserDirectory, UserResidency};
use super::error::{require_arg, FailoverError};
use crate::clock::SharedClock;
use crate::metrics;
use crate::region::RegionHealthMonitor;

/// Where a tenant's traffic should go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverDecision {
    pub selected_region: String,
    pub is_failover: bool,
    pub needs_cross_border_consent: bool,
    pub reason: String,
    pub healthy_regions: Vec<String>,
}

impl FailoverDecision {
    /// Keep serving from `primary`
    fn stay(primary: &str, reason: String, healthy_regions: Vec<String>) -> Self {
        Self {
            selected_region: primary.to_string(),
            is_failover: false,
            needs_cross_border_consent: false,
            reason,
            healthy_regions,
        }
    }
}

/// Outcome of an executed failover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailoverResult {
    /// Traffic moved; `message` is meant for the user
    Succeeded { region: String, message: String },

    /// User must consent before their data leaves the residency region
    NeedsConsent { region: String, consent_url: String },

    /// Move did not happen
    Failed { reason: String },
}

impl FailoverResult {
    fn label(&self) -> &'static str {
        match self {
            FailoverResult::Succeeded { .. } => "succeeded",
            FailoverResult::NeedsConsent { .. } => "needs_consent",
            FailoverResult::Failed { .. } => "failed",
        }
    }
}

/// Failover decision engine
pub struct FailoverDecisionEngine {
    config: FailoverConfig,
    monitor: Arc<RegionHealthMonitor>,
    organizations: Arc<dyn OrganizationDirectory>,
    users: Arc<dyn UserDirectory>,
    compliance: Arc<dyn ComplianceLogSink>,
    clock: SharedClock,
}

impl FailoverDecisionEngine {
    pub fn new(
        config: FailoverConfig,
        monitor: Arc<RegionHealthMonitor>,
        organizations: Arc<dyn OrganizationDirectory>,
        users: Arc<dyn UserDirectory>,
        compliance: Arc<dyn ComplianceLogSink>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            monitor,
            organizations,
            users,
            compliance,
            clock,
        }
    }

    /// Pick the region to serve a tenant from
    ///
    /// Blank identifiers and unknown organizations are caller errors. Any
    /// other failure keeps the primary region.
    pub async fn select_region(
        &self,
        organization_id: &str,
        user_id: Option<&str>,
        primary_region: &str,
    ) -> Result<FailoverDecision, FailoverError> {
        require_arg("organization id", organization_id)?;
        require_arg("primary region", primary_region)?;
        if let Some(user_id) = user_id {
            require_arg("user id", user_id)?;
        }

        let (decision, kind) = match self.decide(organization_id, user_id, primary_region).await {
            Ok(decided) => decided,
            Err(FailoverError::OrganizationNotFound(org)) => return Err(FailoverError::OrganizationNotFound(org)),
            Err(e) => {
                warn!(
                    organization_id,
                    primary_region,
                    error = %e,
                    "Region selection failed, keeping primary region"
                );
                (FailoverDecision::stay(primary_region, e.to_string(), Vec::new()), "fail_safe")
            }
        };

        metrics::FAILOVER_DECISIONS_TOTAL.with_label_values(&[kind]).inc();
        Ok(decision)
    }

    async fn decide(
        &self,
        organization_id: &str,
        user_id: Option<&str>,
        primary: &str,
    ) -> Result<(FailoverDecision, &'static str), FailoverError> {
        if self.monitor.is_region_healthy(primary).await {
            let decision = FailoverDecision::stay(primary, "Primary region healthy".to_string(), vec![primary.to_string()]);
            return Ok((decision, "primary"));
        }

        let organization = self.organization(organization_id).await?;
        let candidates = self.candidates(&organization, primary);

        let Some(target) = self.monitor.get_nearest_healthy_region(primary, &candidates).await else {
            let decision = FailoverDecision::stay(primary, "No failover regions available".to_string(), Vec::new());
            return Ok((decision, "no_candidates"));
        };

        let needs_cross_border_consent = match user_id {
            Some(user_id) => self
                .users
                .get_user(organization_id, user_id)
                .await?
                .is_some_and(|user| user.requires_consent_for(&target)),
            None => false,
        };
        let healthy_regions = self.monitor.healthy_regions().await;

        info!(
            organization_id,
            primary,
            target = %target,
            needs_cross_border_consent,
            "Failover region selected"
        );

        let decision = FailoverDecision {
            selected_region: target,
            is_failover: true,
            needs_cross_border_consent,
            reason: format!("Primary region {} unhealthy", primary),
            healthy_regions,
        };
        Ok((decision, "failover"))
    }

    /// Move a tenant from one region to another
    ///
    /// Unhealthy targets, missing consent and compliance log failures are
    /// outcomes, not errors.
    ///
    /// The target's cached health entry is dropped first, so the move acts on
    /// a fresh health check even inside the cache TTL. [`Self::select_region`]
    /// may therefore have chosen a region that this call then refuses.
    /// A user id the directory does not know is treated like no user: no
    /// consent is asked for and the transfer is recorded as necessity.
    pub async fn failover(
        &self,
        organization_id: &str,
        user_id: Option<&str>,
        from_region: &str,
        to_region: &str,
    ) -> Result<FailoverResult, FailoverError> {
        require_arg("organization id", organization_id)?;
        require_arg("source region", from_region)?;
        require_arg("target region", to_region)?;
        if let Some(user_id) = user_id {
            require_arg("user id", user_id)?;
        }
        if from_region == to_region {
            return Err(FailoverError::InvalidArgument(format!(
                "source and target region are both {}",
                to_region
            )));
        }
        self.organization(organization_id).await?;

        let result = self
            .execute(organization_id, user_id, from_region, to_region)
            .await?;

        metrics::FAILOVER_EXECUTIONS_TOTAL
            .with_label_values(&[result.label()])
            .inc();
        match &result {
            FailoverResult::Succeeded { region, .. } => {
                info!(organization_id, from = from_region, to = %region, "Failover executed")
            }
            FailoverResult::NeedsConsent { region, .. } => {
                info!(organization_id, from = from_region, to = %region, "Failover awaiting consent")
            }
            FailoverResult::Failed { reason } => {
                warn!(organization_id, from = from_region, to = to_region, reason = %reason, "Failover refused")
            }
        }
        Ok(result)
    }

    async fn execute(
        &self,
        organization_id: &str,
        user_id: Option<&str>,
        from: &str,
        to: &str,
    ) -> Result<FailoverResult, FailoverError> {
        // Bypass the cache TTL for the target
        self.monitor.invalidate(to).await;
        if !self.monitor.is_region_healthy(to).await {
            return Ok(FailoverResult::Failed {
                reason: format!("Target region {} is unhealthy", to),
            });
        }

        let user = match user_id {
            Some(user_id) => self.users.get_user(organization_id, user_id).await?,
            None => None,
        };

        if let Some(user) = user.as_ref().filter(|u| u.requires_consent_for(to)) {
            let consent_url = self.consent_url(from, to)?;
            info!(
                organization_id,
                user_id = %user.user_id,
                residency = user.data_residency_region.as_deref().unwrap_or("-"),
                "Cross-border consent required"
            );
            return Ok(FailoverResult::NeedsConsent {
                region: to.to_string(),
                consent_url,
            });
        }

        let legal_basis = match &user {
            Some(user) if user.cross_border_consent_given => LegalBasis::Consent,
            _ => LegalBasis::Necessity,
        };
        let record = TransferRecord::new(organization_id, user_id, from, to, legal_basis, self.clock.now());
        if let Err(e) = self.compliance.record_transfer(record).await {
            return Ok(FailoverResult::Failed {
                reason: format!("Transfer from {} to {} could not be recorded: {}", from, to, e),
            });
        }

        Ok(FailoverResult::Succeeded {
            region: to.to_string(),
            message: notification(user.as_ref(), from, to),
        })
    }

    async fn organization(&self, organization_id: &str) -> Result<OrganizationPolicy, FailoverError> {
        self.organizations
            .get_organization(organization_id)
            .await?
            .ok_or_else(|| FailoverError::OrganizationNotFound(organization_id.to_string()))
    }

    /// Organization regions (or the defaults) minus the primary, deduplicated
    fn candidates(&self, organization: &OrganizationPolicy, primary: &str) -> Vec<String> {
        let regions = if organization.available_regions.is_empty() {
            &self.config.default_regions
        } else {
            &organization.available_regions
        };

        let mut candidates: Vec<String> = Vec::with_capacity(regions.len());
        for region in regions {
            if region != primary && !candidates.contains(region) {
                candidates.push(region.clone());
            }
        }
        candidates
    }

    /// Consent page link carrying the move
    pub fn consent_url(&self, from: &str, to: &str) -> Result<String, FailoverError> {
        reqwest::Url::parse_with_params(&self.config.consent_url, &[("from", from), ("to", to)])
            .map(String::from)
            .map_err(|e| FailoverError::Configuration(format!("consent url {}: {}", self.config.consent_url, e)))
    }
}

/// User-facing wording for a completed move
fn notification(user: Option<&UserResidency>, from: &str, to: &str) -> String {
    match user {
        Some(user) if user.data_residency_region.as_deref() == Some(to) => format!(
            "Your requests are now served from {}, your data residency region, while {} recovers.",
            to, from
        ),
        Some(user) if user.cross_border_consent_given => format!(
            "Your requests are now served from {} under your cross-border consent while {} recovers.",
            to, from
        ),
        _ => format!(
            "Requests were automatically routed from {} to {} while {} recovers.",
            from, to, from
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::failover::compliance::InMemoryComplianceLog;
    use crate::failover::directory::InMemoryDirectory;
    use crate::failover::error::{ComplianceError, DirectoryError};
    use crate::region::{HealthConfig, HealthProbes, RegionTopology, StaticProbes, TopologyHandle};
    use async_trait::async_trait;

    struct Fixture {
        probes: Arc<StaticProbes>,
        directory: Arc<InMemoryDirectory>,
        log: Arc<InMemoryComplianceLog>,
        engine: FailoverDecisionEngine,
    }

    fn monitor(probes: Arc<StaticProbes>, clock: SharedClock) -> Arc<RegionHealthMonitor> {
        Arc::new(RegionHealthMonitor::new(
            HealthConfig::default(),
            TopologyHandle::new(RegionTopology::builtin()),
            HealthProbes::uniform(probes),
            clock,
        ))
    }

    async fn fixture() -> Fixture {
        let clock: SharedClock = Arc::new(ManualClock::starting_now());
        let probes = Arc::new(StaticProbes::new());
        let directory = Arc::new(InMemoryDirectory::new());
        directory
            .upsert_organization(OrganizationPolicy::new("acme", &["us-east-1", "eu-west-1"]))
            .await;
        directory
            .upsert_user(UserResidency::new("acme", "alice", Some("us-east-1")))
            .await;
        directory
            .upsert_user(UserResidency::new("acme", "bob", Some("eu-west-1")))
            .await;
        let log = Arc::new(InMemoryComplianceLog::new());

        let engine = FailoverDecisionEngine::new(
            FailoverConfig::default(),
            monitor(probes.clone(), clock.clone()),
            directory.clone(),
            directory.clone(),
            log.clone(),
            clock,
        );
        Fixture {
            probes,
            directory,
            log,
            engine,
        }
    }

    #[tokio::test]
    async fn test_healthy_primary_is_kept() {
        let f = fixture().await;
        let decision = f.engine.select_region("acme", Some("alice"), "us-east-1").await.unwrap();
        assert!(!decision.is_failover);
        assert!(!decision.needs_cross_border_consent);
        assert_eq!(decision.selected_region, "us-east-1");
        assert_eq!(decision.reason, "Primary region healthy");
        assert_eq!(decision.healthy_regions, vec!["us-east-1".to_string()]);
    }

    #[tokio::test]
    async fn test_unhealthy_primary_fails_over_with_consent_flag() {
        let f = fixture().await;
        f.probes.set_region_up("us-east-1", false).await;

        let decision = f.engine.select_region("acme", Some("alice"), "us-east-1").await.unwrap();
        assert!(decision.is_failover);
        assert!(decision.needs_cross_border_consent);
        assert_eq!(decision.selected_region, "eu-west-1");
        assert_eq!(decision.reason, "Primary region us-east-1 unhealthy");
        assert!(!decision.healthy_regions.contains(&"us-east-1".to_string()));
        assert!(decision.healthy_regions.contains(&"eu-west-1".to_string()));
    }

    #[tokio::test]
    async fn test_consented_user_needs_no_consent() {
        let f = fixture().await;
        f.directory.set_consent("acme", "alice", true).await;
        f.probes.set_region_up("us-east-1", false).await;

        let decision = f.engine.select_region("acme", Some("alice"), "us-east-1").await.unwrap();
        assert!(decision.is_failover);
        assert!(!decision.needs_cross_border_consent);
    }

    #[tokio::test]
    async fn test_unknown_user_needs_no_consent() {
        let f = fixture().await;
        f.probes.set_region_up("us-east-1", false).await;

        let decision = f.engine.select_region("acme", Some("mallory"), "us-east-1").await.unwrap();
        assert!(decision.is_failover);
        assert_eq!(decision.selected_region, "eu-west-1");
        assert!(!decision.needs_cross_border_consent);
    }

    #[tokio::test]
    async fn test_no_candidates_keeps_primary() {
        let f = fixture().await;
        f.directory
            .upsert_organization(OrganizationPolicy::new("solo", &["eu-west-1"]))
            .await;
        f.probes.set_region_up("eu-west-1", false).await;

        let decision = f.engine.select_region("solo", None, "eu-west-1").await.unwrap();
        assert!(!decision.is_failover);
        assert_eq!(decision.selected_region, "eu-west-1");
        assert_eq!(decision.reason, "No failover regions available");
        assert!(decision.healthy_regions.is_empty());
    }

    #[tokio::test]
    async fn test_empty_region_list_uses_defaults() {
        let f = fixture().await;
        f.directory
            .upsert_organization(OrganizationPolicy::new("globex", &[]))
            .await;
        f.probes.set_region_up("us-east-1", false).await;

        let decision = f.engine.select_region("globex", None, "us-east-1").await.unwrap();
        assert!(decision.is_failover);
        // eu-west-1 is closer to Virginia than ap-southeast-1
        assert_eq!(decision.selected_region, "eu-west-1");
    }

    #[tokio::test]
    async fn test_select_region_validation() {
        let f = fixture().await;
        assert!(matches!(
            f.engine.select_region(" ", None, "us-east-1").await,
            Err(FailoverError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.engine.select_region("acme", Some(""), "us-east-1").await,
            Err(FailoverError::InvalidArgument(_))
        ));

        f.probes.set_region_up("us-east-1", false).await;
        assert!(matches!(
            f.engine.select_region("unknown-org", None, "us-east-1").await,
            Err(FailoverError::OrganizationNotFound(_))
        ));
    }

    struct BrokenDirectory;

    #[async_trait]
    impl OrganizationDirectory for BrokenDirectory {
        async fn get_organization(&self, _organization_id: &str) -> Result<Option<OrganizationPolicy>, DirectoryError> {
            Err(DirectoryError::Unavailable("connection reset".into()))
        }
    }

    #[async_trait]
    impl UserDirectory for BrokenDirectory {
        async fn get_user(&self, _organization_id: &str, _user_id: &str) -> Result<Option<UserResidency>, DirectoryError> {
            Err(DirectoryError::Unavailable("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_directory_failure_keeps_primary() {
        let clock: SharedClock = Arc::new(ManualClock::starting_now());
        let probes = Arc::new(StaticProbes::new());
        probes.set_region_up("us-east-1", false).await;
        let engine = FailoverDecisionEngine::new(
            FailoverConfig::default(),
            monitor(probes, clock.clone()),
            Arc::new(BrokenDirectory),
            Arc::new(BrokenDirectory),
            Arc::new(InMemoryComplianceLog::new()),
            clock,
        );

        let decision = engine.select_region("acme", None, "us-east-1").await.unwrap();
        assert!(!decision.is_failover);
        assert_eq!(decision.selected_region, "us-east-1");
        assert!(decision.reason.contains("connection reset"));
        assert!(decision.healthy_regions.is_empty());
    }

    #[tokio::test]
    async fn test_failover_succeeds_for_consented_user() {
        let f = fixture().await;
        f.directory.set_consent("acme", "alice", true).await;

        let result = f.engine.failover("acme", Some("alice"), "us-east-1", "eu-west-1").await.unwrap();
        match result {
            FailoverResult::Succeeded { region, message } => {
                assert_eq!(region, "eu-west-1");
                assert!(message.contains("consent"));
            }
            other => panic!("expected success, got {:?}", other),
        }

        let records = f.log.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].legal_basis, LegalBasis::Consent);
        assert_eq!(records[0].user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_failover_needs_consent() {
        let f = fixture().await;
        let result = f.engine.failover("acme", Some("alice"), "us-east-1", "eu-west-1").await.unwrap();
        match result {
            FailoverResult::NeedsConsent { region, consent_url } => {
                assert_eq!(region, "eu-west-1");
                assert!(consent_url.contains("from=us-east-1"));
                assert!(consent_url.contains("to=eu-west-1"));
            }
            other => panic!("expected consent, got {:?}", other),
        }
        assert!(f.log.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_failover_into_residency_region_is_necessity() {
        let f = fixture().await;
        let result = f.engine.failover("acme", Some("bob"), "us-east-1", "eu-west-1").await.unwrap();
        match result {
            FailoverResult::Succeeded { message, .. } => assert!(message.contains("data residency")),
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(f.log.records().await[0].legal_basis, LegalBasis::Necessity);
    }

    #[tokio::test]
    async fn test_failover_without_user_is_auto_routed() {
        let f = fixture().await;
        let result = f.engine.failover("acme", None, "us-east-1", "eu-west-1").await.unwrap();
        match result {
            FailoverResult::Succeeded { message, .. } => assert!(message.contains("automatically routed")),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failover_for_unknown_user_is_necessity() {
        let f = fixture().await;
        let result = f
            .engine
            .failover("acme", Some("mallory"), "us-east-1", "eu-west-1")
            .await
            .unwrap();
        assert!(matches!(result, FailoverResult::Succeeded { .. }));

        let records = f.log.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].legal_basis, LegalBasis::Necessity);
        assert_eq!(records[0].user_id.as_deref(), Some("mallory"));
    }

    #[tokio::test]
    async fn test_failover_to_unhealthy_target_fails() {
        let f = fixture().await;
        f.probes.set_region_up("eu-west-1", false).await;
        let result = f.engine.failover("acme", Some("alice"), "us-east-1", "eu-west-1").await.unwrap();
        assert_eq!(
            result,
            FailoverResult::Failed {
                reason: "Target region eu-west-1 is unhealthy".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_failover_rechecks_target_health() {
        let f = fixture().await;
        // Warm the cache with a healthy view, then take the region down
        assert!(f.engine.monitor.is_region_healthy("eu-west-1").await);
        f.probes.set_region_up("eu-west-1", false).await;

        let result = f.engine.failover("acme", None, "us-east-1", "eu-west-1").await.unwrap();
        assert!(matches!(result, FailoverResult::Failed { .. }));
    }

    #[tokio::test]
    async fn test_failover_caller_errors() {
        let f = fixture().await;
        assert!(matches!(
            f.engine.failover("", None, "us-east-1", "eu-west-1").await,
            Err(FailoverError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.engine.failover("acme", None, "us-east-1", "us-east-1").await,
            Err(FailoverError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.engine.failover("ghost", None, "us-east-1", "eu-west-1").await,
            Err(FailoverError::OrganizationNotFound(_))
        ));
    }

    struct RejectingLog;

    #[async_trait]
    impl ComplianceLogSink for RejectingLog {
        async fn record_transfer(&self, _record: TransferRecord) -> Result<(), ComplianceError> {
            Err(ComplianceError::Unavailable("audit store offline".into()))
        }
    }

    #[tokio::test]
    async fn test_unrecorded_transfer_fails() {
        let clock: SharedClock = Arc::new(ManualClock::starting_now());
        let directory = Arc::new(InMemoryDirectory::new());
        directory
            .upsert_organization(OrganizationPolicy::new("acme", &[]))
            .await;
        let engine = FailoverDecisionEngine::new(
            FailoverConfig::default(),
            monitor(Arc::new(StaticProbes::new()), clock.clone()),
            directory.clone(),
            directory,
            Arc::new(RejectingLog),
            clock,
        );

        let result = engine.failover("acme", None, "us-east-1", "eu-west-1").await.unwrap();
        match result {
            FailoverResult::Failed { reason } => assert!(reason.contains("audit store offline")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_consent_url_encodes_parameters() {
        let f = fixture().await;
        let url = f.engine.consent_url("us east", "eu&west").unwrap();
        assert!(url.contains("from=us+east"));
        assert!(url.contains("to=eu%26west"));
    }
}
