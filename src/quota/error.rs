//! Quota Module Error Types

/// Errors reported by a counter store backend
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Store could not be reached
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    /// Store did not answer in time
    #[error("Counter store operation timed out after {0}ms")]
    Timeout(u64),

    /// Store answered with something we cannot interpret
    #[error("Unexpected counter store reply: {0}")]
    Protocol(String),

    /// Key exists but holds a different kind of value
    #[error("Key {0} holds a value of the wrong type")]
    WrongType(String),
}

/// Errors reported by the quota engine
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// Malformed request or scope (caller error, not retried)
    #[error("Invalid quota request: {0}")]
    InvalidRequest(String),

    /// Limits provider does not know the organization
    #[error("Organization not found: {0}")]
    OrganizationNotFound(String),

    /// Limits provider failed
    #[error("Limits lookup failed: {0}")]
    Limits(String),

    /// Counter store failure outside the fail-open window check
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(0)
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Protocol(err.to_string())
        }
    }
}
