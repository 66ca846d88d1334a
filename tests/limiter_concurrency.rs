use std::sync::Arc;

use tempo_gateway::{ManualClock, MemoryBucketStore, RateLimiter};

const EPOCH_MS: u64 = 1_700_000_000_000;

#[tokio::test]
async fn concurrent_same_key_checks_admit_exactly_capacity() {
    let clock = Arc::new(ManualClock::new(EPOCH_MS));
    let store = Arc::new(MemoryBucketStore::new(clock.clone()));
    let limiter = Arc::new(
        RateLimiter::new(store, clock)
            .with_capacity(5)
            .with_refill_per_sec(0.0),
    );

    let mut handles = Vec::new();
    for _ in 0..32 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter.check("burst-caller").await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        let decision = handle.await.expect("task");
        assert!(matches!(
            decision,
            tempo_gateway::Decision::Admitted | tempo_gateway::Decision::Rejected
        ));
        if decision.is_admitted() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 5);

    // The bucket really is empty afterwards.
    assert_eq!(
        limiter.check("burst-caller").await,
        tempo_gateway::Decision::Rejected
    );
}

#[tokio::test]
async fn concurrent_checks_for_distinct_keys_do_not_interfere() {
    let clock = Arc::new(ManualClock::new(EPOCH_MS));
    let store = Arc::new(MemoryBucketStore::new(clock.clone()));
    let limiter = Arc::new(
        RateLimiter::new(store, clock)
            .with_capacity(2)
            .with_refill_per_sec(0.0),
    );

    let mut handles = Vec::new();
    for caller in 0..8 {
        for _ in 0..2 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check(&format!("caller-{caller}")).await
            }));
        }
    }

    for handle in handles {
        assert!(handle.await.expect("task").is_admitted());
    }
}
