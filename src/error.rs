/// Error type for this crate.
///
/// A denied admission is **not** an error: it is reported as a
/// [`Decision`](crate::Decision) with `allowed == false`. Errors here mean the
/// decision could not be made at all.
#[derive(Debug, thiserror::Error)]
pub enum QuotaraError {
    /// No policy matches the (tenant, route) pair and no system default is
    /// configured. This is a configuration problem, not a capacity one.
    #[error("no policy for tenant `{tenant}` route `{route}` and no default policy configured")]
    PolicyNotFound {
        /// Tenant the evaluation was for.
        tenant: String,
        /// Route the evaluation was for.
        route: String,
    },

    /// The shared counter store could not be reached or timed out, after one
    /// transparent retry. Callers decide fail-open vs fail-closed.
    #[error("counter store unavailable: {0}")]
    StoreUnavailable(#[source] redis::RedisError),

    /// Policy validation failed at write time. The policy was not stored.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// A tenant id, route, or key prefix failed validation.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The store connection pool was configured with zero connections.
    #[error("invalid store connection count: {0}")]
    InvalidConnectionCount(String),

    /// A stored policy record could not be decoded.
    #[error("malformed policy record: {0}")]
    MalformedPolicyRecord(#[from] serde_json::Error),
}

impl From<redis::RedisError> for QuotaraError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreUnavailable(err)
    }
}
