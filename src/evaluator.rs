use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::{
    Algorithm, CounterStore, Decision, DefaultPolicy, Policy, QuotaraError, QuotaraRedisClient,
    RedisKey, RedisPolicyStore, Route, Scope, TenantId, algorithms::AlgorithmParams,
    redis::RedisKeyGenerator,
};

struct CachedResolution {
    policy: Option<Policy>,
    fetched_at: Instant,
}

// Upper bound on cached (tenant, route) resolutions. Tenants and routes come
// from requests, so the cache must stay bounded no matter the cardinality.
pub(crate) const POLICY_CACHE_MAX_LEN: usize = 512;

/// The evaluation orchestrator.
///
/// Per evaluation: resolve the authoritative policy for (tenant, route) —
/// exact tenant+route record, else tenant-wide record, else the configured
/// default — derive the counter key, and dispatch one atomic evaluation to
/// the counter store. A denied request is a normal [`Decision`], never an
/// error; [`QuotaraError::PolicyNotFound`] is raised only when nothing
/// resolves. No retries happen at this layer.
///
/// Resolved policies may be cached in-process behind a bounded TTL: a
/// just-changed limit is picked up late by at most the TTL, which is an
/// accepted trade-off. The cache is bounded in size as well as time: expired
/// entries are evicted when touched, and once the map is full a sweep drops
/// every expired entry before anything new is admitted. Counter state is
/// never cached anywhere — correctness requires every process to observe the
/// same atomic state.
pub struct Evaluator {
    policies: RedisPolicyStore,
    counters: CounterStore,
    keys: RedisKeyGenerator,
    default_policy: Option<DefaultPolicy>,
    policy_cache_ttl: Duration,
    policy_cache: DashMap<(TenantId, Route), CachedResolution>,
}

impl Evaluator {
    /// Create an evaluator over a pooled client. A zero `policy_cache_ttl`
    /// disables the policy cache entirely.
    pub fn new(
        client: QuotaraRedisClient,
        prefix: Option<RedisKey>,
        default_policy: Option<DefaultPolicy>,
        policy_cache_ttl: Duration,
    ) -> Self {
        let prefix = prefix.unwrap_or_else(RedisKey::default_prefix);

        Self {
            policies: RedisPolicyStore::new(client.clone(), Some(prefix.clone())),
            counters: CounterStore::new(client),
            keys: RedisKeyGenerator::new(prefix),
            default_policy,
            policy_cache_ttl,
            policy_cache: DashMap::new(),
        }
    }

    pub(crate) fn policies(&self) -> &RedisPolicyStore {
        &self.policies
    }

    pub(crate) fn counters(&self) -> &CounterStore {
        &self.counters
    }

    /// Decide whether `tenant` may proceed against `route`, at the current
    /// wall-clock time.
    pub async fn evaluate(
        &self,
        tenant: &TenantId,
        route: &Route,
    ) -> Result<Decision, QuotaraError> {
        self.evaluate_at(tenant, route, unix_now()).await
    }

    /// Decide at an explicit timestamp (unix seconds, fractional). The
    /// timestamp feeds the atomic scripts; key TTLs still use store time.
    pub async fn evaluate_at(
        &self,
        tenant: &TenantId,
        route: &Route,
        now: f64,
    ) -> Result<Decision, QuotaraError> {
        let policy = self.resolve(tenant, route).await?;

        let counter_route = match policy.scope {
            Scope::Tenant => None,
            Scope::TenantRoute => Some(route),
        };
        let key = self.keys.counter_key(tenant, counter_route, policy.algorithm);

        let params = AlgorithmParams::from_policy(&policy);
        let decision = self.counters.atomic_evaluate(&key, &params, now).await?;

        tracing::debug!(
            tenant = %tenant,
            route = %route,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "request evaluated"
        );

        Ok(decision)
    } // end method evaluate_at

    async fn resolve(&self, tenant: &TenantId, route: &Route) -> Result<Policy, QuotaraError> {
        let cache_key = (tenant.clone(), route.clone());

        if self.policy_cache_ttl > Duration::ZERO
            && let Some(entry) = self.policy_cache.get(&cache_key)
        {
            if entry.fetched_at.elapsed() <= self.policy_cache_ttl {
                let policy = entry.policy.clone();
                drop(entry);
                return self.materialize(policy, tenant, route);
            }

            // Expired entries are evicted on sight, not overwritten in place.
            drop(entry);
            self.policy_cache.remove(&cache_key);
        }

        let policy = self.policies.get_matching(tenant, route).await?;

        if self.policy_cache_ttl > Duration::ZERO {
            self.cache_resolution(cache_key, policy.clone());
        }

        self.materialize(policy, tenant, route)
    }

    /// Admit a resolution into the cache. Once the map is full, only expired
    /// entries make room; a full cache of fresh entries admits nothing new.
    fn cache_resolution(&self, key: (TenantId, Route), policy: Option<Policy>) {
        if self.policy_cache.len() >= POLICY_CACHE_MAX_LEN {
            let ttl = self.policy_cache_ttl;
            self.policy_cache
                .retain(|_, entry| entry.fetched_at.elapsed() <= ttl);
        }

        if self.policy_cache.len() < POLICY_CACHE_MAX_LEN {
            self.policy_cache.insert(
                key,
                CachedResolution {
                    policy,
                    fetched_at: Instant::now(),
                },
            );
        }
    }

    #[cfg(test)]
    pub(crate) fn policy_cache_len(&self) -> usize {
        self.policy_cache.len()
    }

    fn materialize(
        &self,
        found: Option<Policy>,
        tenant: &TenantId,
        route: &Route,
    ) -> Result<Policy, QuotaraError> {
        if let Some(policy) = found {
            return Ok(policy);
        }

        match self.default_policy {
            Some(default) => Ok(Policy {
                tenant_id: tenant.clone(),
                route: Some(route.clone()),
                scope: Scope::TenantRoute,
                algorithm: default.algorithm,
                limit: default.limit,
                window_seconds: default.window_seconds,
                burst: default.burst,
                ttl_seconds: None,
            }),
            None => Err(QuotaraError::PolicyNotFound {
                tenant: tenant.to_string(),
                route: route.to_string(),
            }),
        }
    }

    /// Drop cached resolutions for a tenant, so a policy write through the
    /// same process takes effect immediately.
    pub(crate) fn invalidate(&self, tenant: &TenantId) {
        self.policy_cache.retain(|(t, _), _| t != tenant);
    }

    /// Delete every counter key a (tenant, route) pair can map to, resetting
    /// its budget to fresh.
    pub(crate) async fn reset_counters(
        &self,
        tenant: &TenantId,
        route: &Route,
    ) -> Result<(), QuotaraError> {
        let keys = [
            self.keys.counter_key(tenant, None, Algorithm::SlidingWindow),
            self.keys.counter_key(tenant, None, Algorithm::TokenBucket),
            self.keys.counter_key(tenant, Some(route), Algorithm::SlidingWindow),
            self.keys.counter_key(tenant, Some(route), Algorithm::TokenBucket),
        ];

        self.counters.delete(&keys).await
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
