use redis::AsyncCommands;

use crate::{
    Policy, QuotaraError, QuotaraRedisClient, RedisKey, Route, TenantId,
    redis::common::RedisKeyGenerator,
};

/// CRUD over rate-limit policies stored in Redis.
///
/// Policy records are camelCase JSON strings under
/// `<prefix>:p:<tenant>:<route-or-*>`, indexed per tenant by a set under
/// `<prefix>:pset:<tenant>` for listing. Writes are create-or-replace and
/// idempotent on the (tenant, route, scope) key; concurrent writers are
/// last-write-wins — policy churn is rare relative to evaluations, so no
/// optimistic concurrency is needed.
#[derive(Debug)]
pub struct RedisPolicyStore {
    client: QuotaraRedisClient,
    keys: RedisKeyGenerator,
}

impl RedisPolicyStore {
    /// Create a policy store over a pooled client. `prefix` defaults to
    /// `quotara` and must match the prefix used by the rest of the system.
    pub fn new(client: QuotaraRedisClient, prefix: Option<RedisKey>) -> Self {
        let prefix = prefix.unwrap_or_else(RedisKey::default_prefix);

        Self {
            client,
            keys: RedisKeyGenerator::new(prefix),
        }
    }

    fn record_route<'a>(policy: &'a Policy) -> Option<&'a Route> {
        policy.route.as_ref().filter(|route| !route.is_wildcard())
    }

    /// Validate and store a policy, replacing any previous record for the
    /// same (tenant, route) key. An invalid policy is rejected with
    /// [`QuotaraError::InvalidPolicy`] and never written.
    pub async fn create(&self, policy: &Policy) -> Result<(), QuotaraError> {
        policy.validate()?;

        let record = serde_json::to_string(policy)?;
        let key = self
            .keys
            .policy_key(&policy.tenant_id, Self::record_route(policy));
        let index_key = self.keys.policy_index_key(&policy.tenant_id);

        // Record and index entry commit together.
        let mut pipe = redis::pipe();
        pipe.atomic();

        match policy.ttl_seconds {
            Some(ttl) => {
                pipe.set_ex(&key, &record, ttl).ignore();
            }
            None => {
                pipe.set(&key, &record).ignore();
            }
        }
        pipe.sadd(&index_key, &key).ignore();

        let mut connection = self.client.get();
        pipe.query_async::<()>(&mut connection).await?;

        tracing::info!(
            tenant = %policy.tenant_id,
            route = ?policy.route,
            algorithm = ?policy.algorithm,
            limit = policy.limit,
            "policy saved"
        );

        Ok(())
    } // end method create

    /// Fetch the policy stored for exactly (tenant, route). `None` route
    /// addresses the tenant-wide record.
    pub async fn get(
        &self,
        tenant: &TenantId,
        route: Option<&Route>,
    ) -> Result<Option<Policy>, QuotaraError> {
        let key = self.keys.policy_key(tenant, route);

        let mut connection = self.client.get();
        let record: Option<String> = connection.get(&key).await?;

        match record {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Resolve the most specific policy for (tenant, route): the exact
    /// tenant+route record if present, else the tenant-wide record. One
    /// `MGET` round trip.
    pub async fn get_matching(
        &self,
        tenant: &TenantId,
        route: &Route,
    ) -> Result<Option<Policy>, QuotaraError> {
        let route_key = self.keys.policy_key(tenant, Some(route));
        let tenant_key = self.keys.policy_key(tenant, None);

        let mut connection = self.client.get();
        let (route_record, tenant_record): (Option<String>, Option<String>) = redis::cmd("MGET")
            .arg(&route_key)
            .arg(&tenant_key)
            .query_async(&mut connection)
            .await?;

        match route_record.or(tenant_record) {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// List all policies of a tenant, in no guaranteed order. Index entries
    /// whose record has expired are evicted lazily here.
    pub async fn list(&self, tenant: &TenantId) -> Result<Vec<Policy>, QuotaraError> {
        let index_key = self.keys.policy_index_key(tenant);

        let mut connection = self.client.get();
        let members: Vec<String> = connection.smembers(&index_key).await?;

        if members.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("MGET");
        for member in &members {
            cmd.arg(member);
        }
        let records: Vec<Option<String>> = cmd.query_async(&mut connection).await?;

        let mut policies = Vec::with_capacity(members.len());
        let mut stale = Vec::new();

        for (member, record) in members.iter().zip(records) {
            match record {
                Some(json) => policies.push(serde_json::from_str(&json)?),
                None => stale.push(member),
            }
        }

        if !stale.is_empty() {
            let mut cmd = redis::cmd("SREM");
            cmd.arg(&index_key);
            for member in stale {
                cmd.arg(member);
            }
            cmd.query_async::<i64>(&mut connection).await?;
        }

        Ok(policies)
    } // end method list

    /// Delete the policy stored for exactly (tenant, route). Returns whether
    /// a record was removed; later evaluations fall back to the next
    /// resolution step.
    pub async fn delete(
        &self,
        tenant: &TenantId,
        route: Option<&Route>,
    ) -> Result<bool, QuotaraError> {
        let key = self.keys.policy_key(tenant, route);
        let index_key = self.keys.policy_index_key(tenant);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&key);
        pipe.srem(&index_key, &key).ignore();

        let mut connection = self.client.get();
        let (deleted,): (i64,) = pipe.query_async(&mut connection).await?;

        tracing::info!(
            tenant = %tenant,
            route = ?route,
            deleted = deleted > 0,
            "policy deleted"
        );

        Ok(deleted > 0)
    }
}
