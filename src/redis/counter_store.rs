use std::sync::{Arc, PoisonError, RwLock};

use crate::{
    Decision, QuotaraError, QuotaraRedisClient,
    algorithms::{AlgorithmParams, ScriptKind, decode_raw},
};

/// Adapter over the shared atomic counter store.
///
/// Every admission decision is one `EVALSHA` round trip executing the stored
/// script for the policy's algorithm. The store serializes scripts per key,
/// so this is the crate's single serialization point; no in-process lock is
/// ever held across a network round trip.
///
/// Script lifecycle: each script is `SCRIPT LOAD`ed at most once per process
/// under normal operation and its SHA handle cached for the process lifetime.
/// Loading is idempotent server-side, so racing installs at startup all
/// converge on the same handle. If the store loses the script (flush,
/// failover) or a connection drops, the call transparently re-installs and
/// retries once — visible to the caller only as one elevated-latency call.
#[derive(Debug)]
pub struct CounterStore {
    client: QuotaraRedisClient,
    sliding_window_sha: RwLock<Option<Arc<str>>>,
    token_bucket_sha: RwLock<Option<Arc<str>>>,
}

impl CounterStore {
    /// Create a counter store over a pooled client.
    pub fn new(client: QuotaraRedisClient) -> Self {
        Self {
            client,
            sliding_window_sha: RwLock::new(None),
            token_bucket_sha: RwLock::new(None),
        }
    }

    fn sha_cell(&self, kind: ScriptKind) -> &RwLock<Option<Arc<str>>> {
        match kind {
            ScriptKind::SlidingWindow => &self.sliding_window_sha,
            ScriptKind::TokenBucket => &self.token_bucket_sha,
        }
    }

    fn cached_sha(&self, kind: ScriptKind) -> Option<Arc<str>> {
        self.sha_cell(kind)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Load the script for `kind` into the store and cache its handle.
    /// Safe to race: `SCRIPT LOAD` of the same source returns the same SHA.
    async fn install(&self, kind: ScriptKind) -> Result<Arc<str>, QuotaraError> {
        let mut connection = self.client.get();

        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(kind.source())
            .query_async(&mut connection)
            .await?;
        let sha: Arc<str> = Arc::from(sha);

        tracing::info!(script = kind.name(), sha = %sha, "admission script installed");

        *self
            .sha_cell(kind)
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(sha.clone());

        Ok(sha)
    }

    async fn handle(&self, kind: ScriptKind) -> Result<Arc<str>, QuotaraError> {
        match self.cached_sha(kind) {
            Some(sha) => Ok(sha),
            None => self.install(kind).await,
        }
    }

    async fn invoke(
        &self,
        sha: &str,
        key: &str,
        params: &AlgorithmParams,
        now: f64,
    ) -> Result<(i64, i64, i64), redis::RedisError> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha).arg(1).arg(key);
        params.push_args(&mut cmd, now);

        let mut connection = self.client.get();
        cmd.query_async(&mut connection).await
    }

    /// Execute one atomic admission evaluation for `key` at time `now`
    /// (unix seconds, fractional).
    ///
    /// Retries once, transparently, when the script is missing from the store
    /// or the connection was lost mid-call; any further failure surfaces as
    /// [`QuotaraError::StoreUnavailable`]. A timed-out call is an error, never
    /// an implicit allow or deny.
    pub async fn atomic_evaluate(
        &self,
        key: &str,
        params: &AlgorithmParams,
        now: f64,
    ) -> Result<Decision, QuotaraError> {
        let kind = params.kind();
        let sha = self.handle(kind).await?;

        match self.invoke(&sha, key, params, now).await {
            Ok(raw) => Ok(decode_raw(raw, params.limit())),
            Err(err) if err.kind() == redis::ErrorKind::NoScriptError => {
                tracing::warn!(
                    script = kind.name(),
                    "admission script missing from store, reinstalling"
                );

                let sha = self.install(kind).await?;
                let raw = self.invoke(&sha, key, params, now).await?;
                Ok(decode_raw(raw, params.limit()))
            }
            Err(err) if is_connection_error(&err) => {
                tracing::warn!(error = %err, "store connection lost, retrying once");

                // The pool rotates to another connection; reinstall in case
                // the store restarted with an empty script cache.
                let sha = self.install(kind).await?;
                let raw = self.invoke(&sha, key, params, now).await?;
                Ok(decode_raw(raw, params.limit()))
            }
            Err(err) => Err(err.into()),
        }
    } // end method atomic_evaluate

    /// Health probe: round trip a `PING` through the pool.
    pub async fn ping(&self) -> Result<(), QuotaraError> {
        let mut connection = self.client.get();
        redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await?;
        Ok(())
    }

    /// Delete counter keys, resetting their state to fresh.
    pub(crate) async fn delete(&self, keys: &[Arc<str>]) -> Result<(), QuotaraError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(&**key);
        }

        let mut connection = self.client.get();
        cmd.query_async::<i64>(&mut connection).await?;
        Ok(())
    }
}

fn is_connection_error(err: &redis::RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}
