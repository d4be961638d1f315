//! Failover Module Error Types

/// Organization or user directory failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Directory lookup failed: {0}")]
    Lookup(String),
}

/// Compliance log failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum ComplianceError {
    #[error("Compliance log unavailable: {0}")]
    Unavailable(String),

    #[error("Transfer record rejected: {0}")]
    Rejected(String),
}

/// Caller-facing failover errors
///
/// Business outcomes (unhealthy target, consent required) are not errors;
/// they are `FailoverResult` variants.
#[derive(Debug, thiserror::Error)]
pub enum FailoverError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Organization not found: {0}")]
    OrganizationNotFound(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("Failover misconfigured: {0}")]
    Configuration(String),
}

pub(crate) fn require_arg(what: &str, value: &str) -> Result<(), FailoverError> {
    if value.trim().is_empty() {
        return Err(FailoverError::InvalidArgument(format!("{} must not be blank", what)));
    }
    Ok(())
}
