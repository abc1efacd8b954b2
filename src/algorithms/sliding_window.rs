//! Sliding-window counter (the default algorithm).
//!
//! This is the fixed-window approximation of a sliding window: one integer
//! counter plus the timestamp of the window it belongs to, reset atomically
//! once the window has elapsed. The known precision trade-off: a burst
//! straddling a window boundary can reach close to `2 x limit` admissions.
//! That is a property of the algorithm, not a bug; callers who need strict
//! smoothing should select the token bucket instead.

/// Atomic sliding-window evaluation.
///
/// State: hash at `KEYS[1]` with fields `count` and `window_start`, expiring
/// `window` seconds after the last admission.
///
/// ARGV: `limit`, `window` (seconds), `burst`, `now` (unix seconds, may be
/// fractional).
///
/// Returns `{allowed, remaining, reset_at}`. `remaining` is relative to
/// `limit`; burst headroom above it is admitted but reported as 0 remaining.
pub(crate) const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local burst = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local ceiling = limit + burst

local state = redis.call("HMGET", key, "count", "window_start")
local count = tonumber(state[1])
local window_start = tonumber(state[2])

if count == nil or now - window_start >= window then
    count = 0
    window_start = now
end

if count < ceiling then
    count = count + 1
    redis.call("HSET", key, "count", count, "window_start", window_start)
    redis.call("EXPIRE", key, window)

    local remaining = limit - count
    if remaining < 0 then
        remaining = 0
    end

    return {1, remaining, math.floor(window_start + window)}
end

return {0, 0, math.floor(window_start + window)}
"#;

/// Parameters of one sliding-window evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowParams {
    /// Steady-state budget per window.
    pub limit: u64,
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Grace allowance above `limit`. Raises the admitted ceiling to
    /// `limit + burst` without changing the reported limit.
    pub burst: u64,
}
