//! Store-side components: the pooled client, key layout, the atomic counter
//! store adapter, and policy CRUD.

mod common;
pub use common::{QuotaraRedisClient, RedisKey};
pub(crate) use common::RedisKeyGenerator;
#[cfg(test)]
pub(crate) use common::COUNTER_KEY_CACHE_MAX_LEN;

mod counter_store;
pub use counter_store::*;

mod policy_store;
pub use policy_store::*;
