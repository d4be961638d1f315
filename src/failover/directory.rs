//! Organization and User Directory
//!
//! Read-only lookups for an organization's regions and a user's data
//! residency and cross-border consent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::config::DirectoryConfig;
use super::error::DirectoryError;

/// Region policy of an organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationPolicy {
    pub organization_id: String,

    /// Regions the organization may be served from; empty means the defaults
    #[serde(default)]
    pub available_regions: Vec<String>,
}

impl OrganizationPolicy {
    pub fn new(organization_id: &str, available_regions: &[&str]) -> Self {
        Self {
            organization_id: organization_id.to_string(),
            available_regions: available_regions.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Data residency of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResidency {
    pub organization_id: String,
    pub user_id: String,

    #[serde(default)]
    pub data_residency_region: Option<String>,

    #[serde(default)]
    pub cross_border_consent_given: bool,
}

impl UserResidency {
    pub fn new(organization_id: &str, user_id: &str, data_residency_region: Option<&str>) -> Self {
        Self {
            organization_id: organization_id.to_string(),
            user_id: user_id.to_string(),
            data_residency_region: data_residency_region.map(str::to_string),
            cross_border_consent_given: false,
        }
    }

    pub fn with_consent(mut self, given: bool) -> Self {
        self.cross_border_consent_given = given;
        self
    }

    /// Whether serving this user from `region` needs their consent first
    ///
    /// A user without a declared residency region is treated as resident
    /// nowhere, so any region needs consent.
    pub fn requires_consent_for(&self, region: &str) -> bool {
        !self.cross_border_consent_given && self.data_residency_region.as_deref() != Some(region)
    }
}

#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn get_organization(&self, organization_id: &str) -> Result<Option<OrganizationPolicy>, DirectoryError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, organization_id: &str, user_id: &str) -> Result<Option<UserResidency>, DirectoryError>;
}

/// Directory held in memory, seeded from configuration
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    organizations: RwLock<HashMap<String, OrganizationPolicy>>,
    users: RwLock<HashMap<(String, String), UserResidency>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        let organizations = config
            .organizations
            .iter()
            .map(|o| (o.organization_id.clone(), o.clone()))
            .collect();
        let users = config
            .users
            .iter()
            .map(|u| ((u.organization_id.clone(), u.user_id.clone()), u.clone()))
            .collect();
        Self {
            organizations: RwLock::new(organizations),
            users: RwLock::new(users),
        }
    }

    pub async fn upsert_organization(&self, policy: OrganizationPolicy) {
        self.organizations
            .write()
            .await
            .insert(policy.organization_id.clone(), policy);
    }

    pub async fn upsert_user(&self, user: UserResidency) {
        self.users
            .write()
            .await
            .insert((user.organization_id.clone(), user.user_id.clone()), user);
    }

    /// Record a user's consent decision; false when the user is unknown
    pub async fn set_consent(&self, organization_id: &str, user_id: &str, given: bool) -> bool {
        let mut users = self.users.write().await;
        match users.get_mut(&(organization_id.to_string(), user_id.to_string())) {
            Some(user) => {
                user.cross_border_consent_given = given;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl OrganizationDirectory for InMemoryDirectory {
    async fn get_organization(&self, organization_id: &str) -> Result<Option<OrganizationPolicy>, DirectoryError> {
        Ok(self.organizations.read().await.get(organization_id).cloned())
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn get_user(&self, organization_id: &str, user_id: &str) -> Result<Option<UserResidency>, DirectoryError> {
        let key = (organization_id.to_string(), user_id.to_string());
        Ok(self.users.read().await.get(&key).cloned())
    }
}
