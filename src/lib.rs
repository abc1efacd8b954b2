#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(any(feature = "redis-tokio", feature = "redis-smol")))]
compile_error!("quotara requires one of the `redis-tokio` or `redis-smol` features");

mod rate_limiter;
pub use rate_limiter::*;

mod evaluator;
pub use evaluator::*;

mod algorithms;
pub use algorithms::{AlgorithmParams, SlidingWindowParams, TokenBucketParams};

mod redis;
pub use self::redis::*;

mod error;
pub use error::*;

mod common;
pub use common::{
    Algorithm, Decision, DefaultPolicy, Policy, Route, Scope, TenantId,
};

#[cfg(test)]
mod tests;
