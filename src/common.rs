use std::{fmt, ops::Deref, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::QuotaraError;

/// A validated tenant identifier.
///
/// Constraints:
/// - Must not be empty
/// - Must not be longer than 255 bytes
/// - Must not contain colons (colon is the store key separator)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(Arc<str>);

impl Deref for TenantId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = QuotaraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(QuotaraError::InvalidKey(
                "tenant id must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(QuotaraError::InvalidKey(
                "tenant id must not be longer than 255 bytes".to_string(),
            ))
        } else if value.contains(':') {
            Err(QuotaraError::InvalidKey(
                "tenant id must not contain colons".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for TenantId {
    type Error = QuotaraError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0.to_string()
    }
}

/// A validated API route, e.g. `"/v1/search"`.
///
/// Same constraints as [`TenantId`], except the length cap is 500 bytes. The
/// literal `"*"` is reserved for tenant-wide policies and is produced with
/// [`Route::wildcard`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Route(Arc<str>);

impl Route {
    /// The wildcard route, matching all routes of a tenant.
    pub fn wildcard() -> Self {
        Self(Arc::from("*"))
    }

    /// Whether this is the wildcard route.
    pub fn is_wildcard(&self) -> bool {
        &*self.0 == "*"
    }
}

impl Deref for Route {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Route {
    type Error = QuotaraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(QuotaraError::InvalidKey(
                "route must not be empty".to_string(),
            ))
        } else if value.len() > 500 {
            Err(QuotaraError::InvalidKey(
                "route must not be longer than 500 bytes".to_string(),
            ))
        } else if value.contains(':') {
            Err(QuotaraError::InvalidKey(
                "route must not contain colons".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for Route {
    type Error = QuotaraError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl From<Route> for String {
    fn from(value: Route) -> Self {
        value.0.to_string()
    }
}

/// Granularity at which a policy applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    /// One policy for every route of the tenant.
    Tenant,
    /// A policy for one specific (tenant, route) pair.
    TenantRoute,
}

/// Admission algorithm selected by a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Algorithm {
    /// Fixed-window counter approximation of a sliding window.
    SlidingWindow,
    /// Token bucket with continuous refill.
    TokenBucket,
}

/// A rate-limit policy for a tenant, optionally narrowed to one route.
///
/// Policies are stored as camelCase JSON records (`tenantId`,
/// `windowSeconds`, ...). Exactly one policy is authoritative per
/// (tenant, route) pair at evaluation time; see
/// [`Evaluator`](crate::Evaluator) for the resolution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Tenant this policy belongs to.
    pub tenant_id: TenantId,
    /// Route this policy is narrowed to. `None` means all routes; requires
    /// `scope == Scope::Tenant`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    /// Granularity of the policy.
    pub scope: Scope,
    /// Admission algorithm.
    pub algorithm: Algorithm,
    /// Steady-state request budget per window. Must be at least 1.
    pub limit: u64,
    /// Window length in seconds. Must be at least 1.
    pub window_seconds: u64,
    /// Extra headroom above `limit` (token bucket capacity above the steady
    /// rate, or grace allowance for the sliding window). Raises the effective
    /// ceiling without changing the reported limit.
    #[serde(default)]
    pub burst: u64,
    /// Optional auto-expiry of the stored policy record, in seconds. An
    /// expired policy behaves as deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl Policy {
    /// Validate the policy. Called by the policy store before any write; an
    /// invalid policy is rejected and never stored.
    pub fn validate(&self) -> Result<(), QuotaraError> {
        if self.limit == 0 {
            return Err(QuotaraError::InvalidPolicy(
                "limit must be at least 1".to_string(),
            ));
        }

        if self.window_seconds == 0 {
            return Err(QuotaraError::InvalidPolicy(
                "window_seconds must be at least 1".to_string(),
            ));
        }

        if let Some(ttl) = self.ttl_seconds
            && ttl == 0
        {
            return Err(QuotaraError::InvalidPolicy(
                "ttl_seconds must be at least 1 when set".to_string(),
            ));
        }

        match (self.scope, &self.route) {
            (Scope::TenantRoute, Some(route)) if !route.is_wildcard() => Ok(()),
            (Scope::TenantRoute, _) => Err(QuotaraError::InvalidPolicy(
                "TENANT_ROUTE scope requires a concrete route".to_string(),
            )),
            (Scope::Tenant, None) => Ok(()),
            (Scope::Tenant, Some(route)) if route.is_wildcard() => Ok(()),
            (Scope::Tenant, Some(_)) => Err(QuotaraError::InvalidPolicy(
                "TENANT scope must not name a route".to_string(),
            )),
        }
    }

    /// The ceiling actually enforced: `limit + burst`.
    pub fn effective_ceiling(&self) -> u64 {
        self.limit.saturating_add(self.burst)
    }
}

/// Parameters of the system default policy, applied when a tenant has no
/// policy of its own.
///
/// Defaults to sliding window, 100 requests per 60 seconds, no burst.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefaultPolicy {
    /// Admission algorithm.
    pub algorithm: Algorithm,
    /// Steady-state request budget per window.
    pub limit: u64,
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Extra headroom above `limit`.
    pub burst: u64,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::SlidingWindow,
            limit: 100,
            window_seconds: 60,
            burst: 0,
        }
    }
}

/// Outcome of one admission evaluation.
///
/// Produced fresh per evaluation and never persisted. The four fields are the
/// contract for callers emitting rate-limit response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Remaining budget after this evaluation. Zero when denied.
    pub remaining: u64,
    /// The policy limit. Burst headroom is enforced but not reported here.
    pub limit: u64,
    /// Unix timestamp (seconds) at which the budget resets. Advisory for the
    /// token bucket: the time until at least one token is available.
    pub reset_at: u64,
}
