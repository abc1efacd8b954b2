//! Admission algorithms, expressed as atomic state transitions executed by
//! the shared counter store.
//!
//! Each algorithm is one Lua script: read state, advance it, decide, commit —
//! as a single atomic unit. Evaluators in different processes never perform a
//! read-modify-write as two round trips, so concurrent evaluation cannot lose
//! updates or double-admit.

mod sliding_window;
pub use sliding_window::*;

mod token_bucket;
pub use token_bucket::*;

use crate::{Algorithm, Decision, Policy};

/// Identifies which stored script an evaluation dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ScriptKind {
    SlidingWindow,
    TokenBucket,
}

impl ScriptKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::SlidingWindow => "sliding_window",
            Self::TokenBucket => "token_bucket",
        }
    }

    pub(crate) fn source(self) -> &'static str {
        match self {
            Self::SlidingWindow => SLIDING_WINDOW_SCRIPT,
            Self::TokenBucket => TOKEN_BUCKET_SCRIPT,
        }
    }
}

/// Parameters for one admission evaluation, derived from the resolved
/// [`Policy`]. Tagged by algorithm; dispatch is a `match`, not a runtime
/// type check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlgorithmParams {
    /// Sliding-window counter parameters.
    SlidingWindow(SlidingWindowParams),
    /// Token-bucket parameters.
    TokenBucket(TokenBucketParams),
}

impl AlgorithmParams {
    /// Derive evaluation parameters from a resolved policy.
    pub fn from_policy(policy: &Policy) -> Self {
        match policy.algorithm {
            Algorithm::SlidingWindow => Self::SlidingWindow(SlidingWindowParams {
                limit: policy.limit,
                window_seconds: policy.window_seconds,
                burst: policy.burst,
            }),
            Algorithm::TokenBucket => Self::TokenBucket(TokenBucketParams::new(
                policy.limit,
                policy.window_seconds,
                policy.burst,
            )),
        }
    }

    /// The policy limit reported in decisions.
    pub fn limit(&self) -> u64 {
        match self {
            Self::SlidingWindow(p) => p.limit,
            Self::TokenBucket(p) => p.limit,
        }
    }

    pub(crate) fn kind(&self) -> ScriptKind {
        match self {
            Self::SlidingWindow(_) => ScriptKind::SlidingWindow,
            Self::TokenBucket(_) => ScriptKind::TokenBucket,
        }
    }

    /// Append the script ARGV for this evaluation. The argument order must
    /// match the ARGV order documented on each script.
    pub(crate) fn push_args(&self, cmd: &mut redis::Cmd, now: f64) {
        match self {
            Self::SlidingWindow(p) => {
                cmd.arg(p.limit).arg(p.window_seconds).arg(p.burst).arg(now);
            }
            Self::TokenBucket(p) => {
                cmd.arg(p.capacity)
                    .arg(p.refill_rate)
                    .arg(now)
                    .arg(p.idle_ttl_seconds);
            }
        }
    }
}

/// Decode the `{allowed, remaining, reset_at}` triple every script returns.
pub(crate) fn decode_raw(raw: (i64, i64, i64), limit: u64) -> Decision {
    let (allowed, remaining, reset_at) = raw;

    Decision {
        allowed: allowed == 1,
        remaining: u64::try_from(remaining).unwrap_or(0),
        limit,
        reset_at: u64::try_from(reset_at).unwrap_or(0),
    }
}
