//! Top-level entrypoint that wires the policy store, counter store, and
//! evaluator behind one facade.

use std::time::Duration;

use crate::{
    Decision, DefaultPolicy, Evaluator, Policy, QuotaraError, QuotaraRedisClient, RedisKey, Route,
    TenantId,
};

/// Configuration for the shared Redis store.
#[derive(Clone, Debug)]
pub struct RedisStoreOptions {
    /// Pooled store client. See [`QuotaraRedisClient`] for sizing guidance.
    pub client: QuotaraRedisClient,
    /// Optional prefix for all store keys. Defaults to `"quotara"`.
    pub prefix: Option<RedisKey>,
}

/// Top-level configuration for [`RateLimiter`].
#[derive(Clone, Debug)]
pub struct RateLimiterOptions {
    /// Shared store configuration.
    pub store: RedisStoreOptions,
    /// Policy applied when a tenant has no policy of its own. `None` makes
    /// evaluations for unconfigured tenants fail with
    /// [`QuotaraError::PolicyNotFound`].
    pub default_policy: Option<DefaultPolicy>,
    /// How long a resolved policy may be served from the in-process cache.
    /// Zero disables the cache. Counter state is never cached regardless.
    pub policy_cache_ttl: Duration,
}

impl RateLimiterOptions {
    /// Options with the stock defaults: default policy of 100 requests per
    /// 60 seconds (sliding window) and a 1 second policy cache.
    pub fn new(client: QuotaraRedisClient) -> Self {
        Self {
            store: RedisStoreOptions {
                client,
                prefix: None,
            },
            default_policy: Some(DefaultPolicy::default()),
            policy_cache_ttl: Duration::from_secs(1),
        }
    }
}

/// Rate limiter entrypoint.
///
/// Owns the evaluation pipeline and the policy CRUD surface. Policy writes
/// through this facade invalidate the in-process policy cache immediately;
/// writes from other processes are picked up within the cache TTL.
pub struct RateLimiter {
    evaluator: Evaluator,
}

impl RateLimiter {
    /// Create a new [`RateLimiter`].
    pub fn new(options: RateLimiterOptions) -> Self {
        Self {
            evaluator: Evaluator::new(
                options.store.client,
                options.store.prefix,
                options.default_policy,
                options.policy_cache_ttl,
            ),
        }
    }

    /// Decide whether `tenant` may proceed against `route`.
    ///
    /// A denied request is `Ok(decision)` with `allowed == false`; errors
    /// mean no decision could be made (missing policy configuration or an
    /// unavailable store). This crate never falls back to an implicit allow
    /// or deny — that choice belongs to the caller.
    pub async fn evaluate(
        &self,
        tenant: &TenantId,
        route: &Route,
    ) -> Result<Decision, QuotaraError> {
        self.evaluator.evaluate(tenant, route).await
    }

    /// Create or replace a policy. Validates first; an invalid policy is
    /// rejected and never stored.
    pub async fn create_policy(&self, policy: &Policy) -> Result<(), QuotaraError> {
        self.evaluator.policies().create(policy).await?;
        self.evaluator.invalidate(&policy.tenant_id);
        Ok(())
    }

    /// List all policies of a tenant, in no guaranteed order.
    pub async fn list_policies(&self, tenant: &TenantId) -> Result<Vec<Policy>, QuotaraError> {
        self.evaluator.policies().list(tenant).await
    }

    /// Delete the policy for exactly (tenant, route); `None` route addresses
    /// the tenant-wide policy. Returns whether a record was removed. Later
    /// evaluations fall back to the next resolution step.
    pub async fn delete_policy(
        &self,
        tenant: &TenantId,
        route: Option<&Route>,
    ) -> Result<bool, QuotaraError> {
        let deleted = self.evaluator.policies().delete(tenant, route).await?;
        self.evaluator.invalidate(tenant);
        Ok(deleted)
    }

    /// Reset the counters of a (tenant, route) pair to a fresh budget.
    pub async fn reset_counters(
        &self,
        tenant: &TenantId,
        route: &Route,
    ) -> Result<(), QuotaraError> {
        self.evaluator.reset_counters(tenant, route).await
    }

    /// Health probe against the shared store.
    pub async fn ping(&self) -> Result<(), QuotaraError> {
        self.evaluator.counters().ping().await
    }

    /// Access the evaluator directly.
    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }
}
