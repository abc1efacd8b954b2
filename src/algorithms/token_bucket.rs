//! Token bucket with continuous refill.
//!
//! Refill rate is `limit / window_seconds` tokens per second; capacity is
//! `limit + burst`. Tokens are fractional, so refill accrues smoothly rather
//! than in whole-token steps.

/// Atomic token-bucket evaluation.
///
/// State: hash at `KEYS[1]` with fields `tokens` and `last_refill`. A missing
/// hash is a full bucket. The key expires once the bucket would be fully
/// refilled anyway, which is indistinguishable from a fresh one.
///
/// ARGV: `capacity`, `refill_rate` (tokens/second), `now` (unix seconds, may
/// be fractional), `idle_ttl` (seconds).
///
/// Returns `{allowed, remaining, reset_at}`. On denial `reset_at` is the
/// advisory instant at which at least one token will be available.
pub(crate) const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local idle_ttl = tonumber(ARGV[4])

local state = redis.call("HMGET", key, "tokens", "last_refill")
local tokens = tonumber(state[1])
local last_refill = tonumber(state[2])

if tokens == nil then
    tokens = capacity
    last_refill = now
end

local elapsed = now - last_refill
if elapsed > 0 then
    tokens = math.min(capacity, tokens + elapsed * refill_rate)
end

if tokens >= 1 then
    tokens = tokens - 1
    redis.call("HSET", key, "tokens", tokens, "last_refill", now)
    redis.call("EXPIRE", key, idle_ttl)
    return {1, math.floor(tokens), math.floor(now)}
end

redis.call("HSET", key, "tokens", tokens, "last_refill", now)
redis.call("EXPIRE", key, idle_ttl)
return {0, 0, math.ceil(now + (1 - tokens) / refill_rate)}
"#;

/// Parameters of one token-bucket evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketParams {
    /// Steady-state budget per window, reported as the decision limit.
    pub limit: u64,
    /// Bucket capacity: `limit + burst`.
    pub capacity: f64,
    /// Refill rate in tokens per second: `limit / window_seconds`.
    pub refill_rate: f64,
    /// Seconds of inactivity after which the stored bucket state may expire.
    pub idle_ttl_seconds: u64,
}

impl TokenBucketParams {
    pub(crate) fn new(limit: u64, window_seconds: u64, burst: u64) -> Self {
        let capacity = limit.saturating_add(burst) as f64;
        let refill_rate = limit as f64 / window_seconds as f64;

        // Time for an empty bucket to refill completely, plus a second of
        // slack so the expiry never races a refill in flight.
        let idle_ttl_seconds = (capacity / refill_rate).ceil() as u64 + 1;

        Self {
            limit,
            capacity,
            refill_rate,
            idle_ttl_seconds,
        }
    }
}
