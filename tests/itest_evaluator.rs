#![cfg(any(feature = "redis-tokio", feature = "redis-smol"))]

use std::{env, time::Duration};

use quotara::{
    Algorithm, DefaultPolicy, Policy, QuotaraError, QuotaraRedisClient, RateLimiter,
    RateLimiterOptions, RedisKey, RedisStoreOptions, Route, Scope, TenantId,
};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_prefix() -> RedisKey {
    let n: u64 = rand::random();
    RedisKey::try_from(format!("quotara_itest_{n}")).unwrap()
}

fn tenant(s: &str) -> TenantId {
    TenantId::try_from(s).unwrap()
}

fn route(s: &str) -> Route {
    Route::try_from(s).unwrap()
}

async fn build_rate_limiter(url: &str, default_policy: Option<DefaultPolicy>) -> RateLimiter {
    let client = redis::Client::open(url).unwrap();
    let client = QuotaraRedisClient::from_client(client, 2).await.unwrap();

    RateLimiter::new(RateLimiterOptions {
        store: RedisStoreOptions {
            client,
            prefix: Some(unique_prefix()),
        },
        default_policy,
        policy_cache_ttl: Duration::ZERO,
    })
}

fn policy(t: &str, r: Option<&str>, algorithm: Algorithm, limit: u64, burst: u64) -> Policy {
    Policy {
        tenant_id: tenant(t),
        route: r.map(route),
        scope: if r.is_some() {
            Scope::TenantRoute
        } else {
            Scope::Tenant
        },
        algorithm,
        limit,
        window_seconds: 60,
        burst,
        ttl_seconds: None,
    }
}

#[test]
fn sliding_window_drains_and_denies_at_the_limit() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_rate_limiter(&url, None).await;
        let (t, r) = (tenant("acme"), route("/v1/search"));

        rl.create_policy(&policy("acme", Some("/v1/search"), Algorithm::SlidingWindow, 3, 0))
            .await
            .unwrap();

        for expected_remaining in [2, 1, 0] {
            let d = rl.evaluate(&t, &r).await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
            assert_eq!(d.limit, 3);
        }

        let denied = rl.evaluate(&t, &r).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    });
}

#[test]
fn token_bucket_burst_raises_the_ceiling_not_the_limit() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_rate_limiter(&url, None).await;
        let (t, r) = (tenant("acme"), route("/v1/upload"));

        rl.create_policy(&policy("acme", Some("/v1/upload"), Algorithm::TokenBucket, 2, 3))
            .await
            .unwrap();

        // capacity = limit + burst = 5
        for _ in 0..5 {
            let d = rl.evaluate(&t, &r).await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.limit, 2);
        }

        let denied = rl.evaluate(&t, &r).await.unwrap();
        assert!(!denied.allowed);
    });
}

#[test]
fn unconfigured_tenant_uses_the_default_policy() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_rate_limiter(
            &url,
            Some(DefaultPolicy {
                limit: 2,
                ..DefaultPolicy::default()
            }),
        )
        .await;
        let (t, r) = (tenant("newcomer"), route("/v1/search"));

        assert!(rl.evaluate(&t, &r).await.unwrap().allowed);
        assert!(rl.evaluate(&t, &r).await.unwrap().allowed);
        assert!(!rl.evaluate(&t, &r).await.unwrap().allowed);
    });
}

#[test]
fn policy_crud_round_trip_through_the_facade() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_rate_limiter(&url, None).await;
        let t = tenant("acme");

        rl.create_policy(&policy("acme", None, Algorithm::SlidingWindow, 10, 0))
            .await
            .unwrap();
        rl.create_policy(&policy("acme", Some("/v1/search"), Algorithm::TokenBucket, 5, 0))
            .await
            .unwrap();

        let mut limits: Vec<u64> = rl
            .list_policies(&t)
            .await
            .unwrap()
            .iter()
            .map(|p| p.limit)
            .collect();
        limits.sort_unstable();
        assert_eq!(limits, vec![5, 10]);

        assert!(rl.delete_policy(&t, Some(&route("/v1/search"))).await.unwrap());
        assert!(!rl.delete_policy(&t, Some(&route("/v1/search"))).await.unwrap());

        let remaining = rl.list_policies(&t).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].scope, Scope::Tenant);

        // Route evaluations now fall back to the tenant-wide policy.
        let d = rl.evaluate(&t, &route("/v1/search")).await.unwrap();
        assert_eq!(d.limit, 10);
    });
}

#[test]
fn no_policy_and_no_default_is_an_error_not_a_decision() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_rate_limiter(&url, None).await;

        let err = rl
            .evaluate(&tenant("ghost"), &route("/v1/search"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaraError::PolicyNotFound { .. }));
    });
}

#[test]
fn ping_reaches_the_store() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_rate_limiter(&url, None).await;
        rl.ping().await.unwrap();
    });
}
