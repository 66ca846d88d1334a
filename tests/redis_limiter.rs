#![cfg(feature = "store-redis")]

use std::sync::Arc;

use tempo_gateway::{Decision, RateLimiter, RedisBucketStore, SystemClock};

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn now_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0)
}

#[tokio::test]
async fn redis_bucket_store_enforces_capacity_and_reset() {
    let Some(url) = env_nonempty("TEMPO_REDIS_URL").or_else(|| env_nonempty("REDIS_URL")) else {
        return;
    };

    let prefix = format!("tempo_test:{}", now_millis());
    let store = RedisBucketStore::new(url).expect("store").with_prefix(prefix);
    store.ping().await.expect("ping");

    let limiter = RateLimiter::new(Arc::new(store), Arc::new(SystemClock))
        .with_capacity(3)
        .with_refill_per_sec(0.001);

    for _ in 0..3 {
        assert_eq!(limiter.check("caller-1").await, Decision::Admitted);
    }
    assert_eq!(limiter.check("caller-1").await, Decision::Rejected);

    // Distinct keys keep their own buckets.
    assert_eq!(limiter.check("caller-2").await, Decision::Admitted);

    limiter.reset("caller-1").await;
    assert_eq!(limiter.check("caller-1").await, Decision::Admitted);
}
