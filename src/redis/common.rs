use std::{
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use dashmap::DashMap;
use redis::{Client, aio::ConnectionManager};

use crate::{Algorithm, QuotaraError, Route, TenantId};

/// A pooled wrapper over [`redis::aio::ConnectionManager`]s.
///
/// Holds `connection_count` managers and hands them out round-robin. Each
/// manager reconnects on its own when the link drops, so the pool is
/// self-healing. Sizing is a tunable, not an invariant; as a floor, use at
/// least as many connections as runtime worker threads for serving workloads.
pub struct QuotaraRedisClient {
    connection_managers: Arc<Vec<ConnectionManager>>,
    track_index: AtomicUsize,
}

impl std::fmt::Debug for QuotaraRedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaraRedisClient")
            .field("connection_count", &self.connection_managers.len())
            .field("track_index", &self.track_index)
            .finish()
    }
}

impl QuotaraRedisClient {
    /// Create a client with a single pooled connection.
    pub async fn default_from_client(client: Client) -> Result<Self, QuotaraError> {
        Self::from_client(client, 1).await
    }

    /// Create a client with `connection_count` pooled connections.
    pub async fn from_client(
        client: Client,
        connection_count: usize,
    ) -> Result<Self, QuotaraError> {
        if connection_count == 0 {
            return Err(QuotaraError::InvalidConnectionCount(
                "connection count must be > 0".to_string(),
            ));
        }

        let mut connection_managers = Vec::with_capacity(connection_count);

        for _ in 0..connection_count {
            connection_managers.push(client.get_connection_manager().await?);
        }

        Ok(Self {
            connection_managers: Arc::new(connection_managers),
            track_index: AtomicUsize::new(0),
        })
    }

    /// Get the next [`redis::aio::ConnectionManager`] in rotation.
    pub(crate) fn get(&self) -> ConnectionManager {
        let index = self.track_index.fetch_add(1, Ordering::Relaxed);
        self.connection_managers[index % self.connection_managers.len()].clone()
    } // end method get
} // end impl QuotaraRedisClient

impl Clone for QuotaraRedisClient {
    fn clone(&self) -> Self {
        Self {
            connection_managers: self.connection_managers.clone(),
            track_index: AtomicUsize::new(0),
        }
    }
}

/// A validated newtype for the Redis key prefix.
///
/// This is a string with the following constraints:
/// - Must not be empty
/// - Must not be longer than 255 bytes
/// - Must not contain colons
#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq)]
pub struct RedisKey(Arc<str>);

impl RedisKey {
    /// Create a new default prefix.
    pub fn default_prefix() -> Self {
        Self(Arc::from("quotara"))
    }
}

impl Default for RedisKey {
    fn default() -> Self {
        Self::default_prefix()
    }
}

impl Deref for RedisKey {
    type Target = Arc<str>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for RedisKey {
    type Error = QuotaraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(QuotaraError::InvalidKey(
                "Redis key must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(QuotaraError::InvalidKey(
                "Redis key must not be longer than 255 characters".to_string(),
            ))
        } else if value.contains(':') {
            Err(QuotaraError::InvalidKey(
                "Redis key must not contain colons".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CounterKeyId {
    tenant: TenantId,
    route: Option<Route>,
    algorithm: Algorithm,
}

// Upper bound on cached formatted counter keys. (tenant, route) pairs are
// request-derived, so the cache is capped; misses past the cap still format
// the key, they just pay the allocation each time.
pub(crate) const COUNTER_KEY_CACHE_MAX_LEN: usize = 4096;

/// Formats and caches the store keys used by this crate.
///
/// Key layout (`<prefix>` defaults to `quotara`):
/// - counter:      `<prefix>:c:<tenant>:<route-or-*>:<sw|tb>`
/// - policy:       `<prefix>:p:<tenant>:<route-or-*>`
/// - policy index: `<prefix>:pset:<tenant>`
///
/// Tenants and routes cannot contain colons, so keys never collide across
/// tenants or scopes. Counter keys carry an algorithm family tag so a policy
/// switched between algorithms never misreads the other family's state.
#[derive(Debug)]
pub(crate) struct RedisKeyGenerator {
    prefix: RedisKey,

    // cache: counter keys sit on the per-request hot path
    counter_key_cache: DashMap<CounterKeyId, Arc<str>>,
}

impl RedisKeyGenerator {
    pub(crate) fn new(prefix: RedisKey) -> Self {
        Self {
            prefix,
            counter_key_cache: DashMap::new(),
        }
    }

    fn family_tag(algorithm: Algorithm) -> &'static str {
        match algorithm {
            Algorithm::SlidingWindow => "sw",
            Algorithm::TokenBucket => "tb",
        }
    }

    pub(crate) fn counter_key(
        &self,
        tenant: &TenantId,
        route: Option<&Route>,
        algorithm: Algorithm,
    ) -> Arc<str> {
        let id = CounterKeyId {
            tenant: tenant.clone(),
            route: route.cloned(),
            algorithm,
        };

        match self.counter_key_cache.get(&id) {
            Some(value) => value.clone(),
            None => {
                let route_part: &str = route.map_or("*", |r| &**r);
                let value = format!(
                    "{}:c:{}:{}:{}",
                    *self.prefix,
                    tenant,
                    route_part,
                    Self::family_tag(algorithm),
                );
                let value: Arc<str> = Arc::from(value);
                if self.counter_key_cache.len() < COUNTER_KEY_CACHE_MAX_LEN {
                    self.counter_key_cache.insert(id, value.clone());
                }

                value
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_counter_keys(&self) -> usize {
        self.counter_key_cache.len()
    }

    pub(crate) fn policy_key(&self, tenant: &TenantId, route: Option<&Route>) -> String {
        let route_part: &str = route.map_or("*", |r| &**r);
        format!("{}:p:{}:{}", *self.prefix, tenant, route_part)
    }

    pub(crate) fn policy_index_key(&self, tenant: &TenantId) -> String {
        format!("{}:pset:{}", *self.prefix, tenant)
    }
}
