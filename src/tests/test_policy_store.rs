use std::env;

use crate::{
    Algorithm, Policy, QuotaraError, QuotaraRedisClient, RedisKey, RedisPolicyStore, Route, Scope,
    TenantId,
};

use super::runtime::block_on;

fn redis_url() -> String {
    env::var("REDIS_URL")
        .expect("REDIS_URL must be set to run redis-backed tests (e.g. redis://127.0.0.1:6379/)")
}

fn unique_prefix() -> RedisKey {
    let n: u64 = rand::random();
    RedisKey::try_from(format!("quotara_test_{n}")).unwrap()
}

fn tenant(s: &str) -> TenantId {
    TenantId::try_from(s).unwrap()
}

fn route(s: &str) -> Route {
    Route::try_from(s).unwrap()
}

async fn build_store(url: &str) -> RedisPolicyStore {
    let client = redis::Client::open(url).unwrap();
    let client = QuotaraRedisClient::default_from_client(client).await.unwrap();

    RedisPolicyStore::new(client, Some(unique_prefix()))
}

fn route_policy(t: &TenantId, r: &Route, limit: u64) -> Policy {
    Policy {
        tenant_id: t.clone(),
        route: Some(r.clone()),
        scope: Scope::TenantRoute,
        algorithm: Algorithm::SlidingWindow,
        limit,
        window_seconds: 60,
        burst: 0,
        ttl_seconds: None,
    }
}

fn tenant_policy(t: &TenantId, limit: u64) -> Policy {
    Policy {
        tenant_id: t.clone(),
        route: None,
        scope: Scope::Tenant,
        algorithm: Algorithm::SlidingWindow,
        limit,
        window_seconds: 60,
        burst: 0,
        ttl_seconds: None,
    }
}

#[test]
fn create_then_get_round_trips() {
    let url = redis_url();

    block_on(async {
        let store = build_store(&url).await;
        let (t, r) = (tenant("t1"), route("/x"));

        let policy = route_policy(&t, &r, 10);
        store.create(&policy).await.unwrap();

        let fetched = store.get(&t, Some(&r)).await.unwrap();
        assert_eq!(fetched, Some(policy));

        assert_eq!(store.get(&t, None).await.unwrap(), None);
    });
}

#[test]
fn create_is_idempotent_on_the_policy_key() {
    let url = redis_url();

    block_on(async {
        let store = build_store(&url).await;
        let (t, r) = (tenant("t1"), route("/x"));

        store.create(&route_policy(&t, &r, 10)).await.unwrap();
        store.create(&route_policy(&t, &r, 20)).await.unwrap();

        // One effective policy, carrying the last write.
        let listed = store.list(&t).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].limit, 20);
    });
}

#[test]
fn list_returns_all_policies_of_a_tenant() {
    let url = redis_url();

    block_on(async {
        let store = build_store(&url).await;
        let t = tenant("t1");

        store.create(&tenant_policy(&t, 100)).await.unwrap();
        store
            .create(&route_policy(&t, &route("/x"), 10))
            .await
            .unwrap();
        store
            .create(&route_policy(&t, &route("/y"), 20))
            .await
            .unwrap();

        let mut limits: Vec<u64> = store
            .list(&t)
            .await
            .unwrap()
            .iter()
            .map(|p| p.limit)
            .collect();
        limits.sort_unstable();
        assert_eq!(limits, [10, 20, 100]);

        assert!(store.list(&tenant("other")).await.unwrap().is_empty());
    });
}

#[test]
fn delete_removes_the_record_and_reports_whether_it_existed() {
    let url = redis_url();

    block_on(async {
        let store = build_store(&url).await;
        let (t, r) = (tenant("t1"), route("/x"));

        store.create(&route_policy(&t, &r, 10)).await.unwrap();

        assert!(store.delete(&t, Some(&r)).await.unwrap());
        assert_eq!(store.get(&t, Some(&r)).await.unwrap(), None);
        assert!(store.list(&t).await.unwrap().is_empty());

        assert!(!store.delete(&t, Some(&r)).await.unwrap());
    });
}

#[test]
fn get_matching_prefers_the_route_record_and_falls_back_to_tenant() {
    let url = redis_url();

    block_on(async {
        let store = build_store(&url).await;
        let t = tenant("t1");
        let (rx, ry) = (route("/x"), route("/y"));

        store.create(&tenant_policy(&t, 100)).await.unwrap();
        store.create(&route_policy(&t, &rx, 10)).await.unwrap();

        let on_x = store.get_matching(&t, &rx).await.unwrap().unwrap();
        assert_eq!(on_x.limit, 10);
        assert_eq!(on_x.scope, Scope::TenantRoute);

        let on_y = store.get_matching(&t, &ry).await.unwrap().unwrap();
        assert_eq!(on_y.limit, 100);
        assert_eq!(on_y.scope, Scope::Tenant);

        assert_eq!(store.get_matching(&tenant("t2"), &rx).await.unwrap(), None);
    });
}

#[test]
fn invalid_policies_are_rejected_and_never_stored() {
    let url = redis_url();

    block_on(async {
        let store = build_store(&url).await;
        let (t, r) = (tenant("t1"), route("/x"));

        let mut bad = route_policy(&t, &r, 10);
        bad.limit = 0;

        assert!(matches!(
            store.create(&bad).await,
            Err(QuotaraError::InvalidPolicy(_))
        ));
        assert_eq!(store.get(&t, Some(&r)).await.unwrap(), None);
        assert!(store.list(&t).await.unwrap().is_empty());
    });
}

#[test]
fn expired_policies_behave_as_deleted() {
    let url = redis_url();

    block_on(async {
        let store = build_store(&url).await;
        let (t, r) = (tenant("t1"), route("/x"));

        let mut policy = route_policy(&t, &r, 10);
        policy.ttl_seconds = Some(1);
        store.create(&policy).await.unwrap();

        assert!(store.get(&t, Some(&r)).await.unwrap().is_some());

        super::runtime::async_sleep(std::time::Duration::from_millis(1100)).await;

        assert_eq!(store.get(&t, Some(&r)).await.unwrap(), None);
        // The index entry is evicted lazily on list.
        assert!(store.list(&t).await.unwrap().is_empty());
    });
}
