//! Token-bucket admission control over a shared bucket store.
//!
//! The limiter itself is stateless: all bucket state lives behind the
//! [`BucketStore`] trait, and the read-refill-decide-write sequence is a
//! compare-and-swap against the store so concurrent requests for one key
//! are serialized even across gateway processes.

mod memory;
#[cfg(feature = "store-redis")]
mod redis;

pub use memory::MemoryBucketStore;
#[cfg(feature = "store-redis")]
pub use redis::RedisBucketStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::Clock;

/// Storage TTL refreshed on every write. Expiry is advisory: an idle
/// caller's bucket resets to full capacity.
pub const BUCKET_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Each lost race means another writer made progress, so this bound is only
/// reached when contention on one key exceeds the bound itself.
const MAX_CAS_ATTEMPTS: u32 = 64;

/// Per-key bucket state as held in the store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BucketRecord {
    pub tokens: f64,
    pub last_refill_ms: u64,
}

#[derive(Debug, Error)]
#[error("bucket store unavailable: {detail}")]
pub struct StoreUnavailable {
    pub detail: String,
}

impl StoreUnavailable {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Capability surface the limiter needs from its backing store.
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<BucketRecord>, StoreUnavailable>;

    /// Writes `next` only while the stored record still equals `expected`
    /// (`None` = no record). Returns `false` when the guard failed.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&BucketRecord>,
        next: &BucketRecord,
        ttl: Duration,
    ) -> Result<bool, StoreUnavailable>;

    async fn remove(&self, key: &str) -> Result<(), StoreUnavailable>;
}

/// Outcome of an admission check. A store outage surfaces as its own
/// variant so the policy that recovered it stays assertable.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Admitted,
    Rejected,
    FailedOpen { detail: String },
    FailedClosed { detail: String },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted | Decision::FailedOpen { .. })
    }
}

pub struct RateLimiter {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    capacity: u32,
    refill_per_sec: f64,
    fail_open: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn BucketStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            capacity: 60,
            refill_per_sec: 1.0,
            fail_open: false,
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_refill_per_sec(mut self, refill_per_sec: f64) -> Self {
        self.refill_per_sec = refill_per_sec.max(0.0);
        self
    }

    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    pub async fn check(&self, key: &str) -> Decision {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = match self.store.load(key).await {
                Ok(current) => current,
                Err(err) => return self.outage(key, err),
            };

            let now = self.clock.now_epoch_millis();
            let capacity = f64::from(self.capacity);
            let (tokens, last) = match &current {
                Some(record) => (record.tokens, record.last_refill_ms),
                None => (capacity, now),
            };

            let elapsed_secs = now.saturating_sub(last) as f64 / 1000.0;
            let refilled = capacity.min(tokens + elapsed_secs * self.refill_per_sec);

            let admit = refilled >= 1.0;
            let next = BucketRecord {
                // A rejected call still persists the refill, just not a spend.
                tokens: if admit { refilled - 1.0 } else { refilled },
                last_refill_ms: now,
            };

            match self
                .store
                .compare_and_swap(key, current.as_ref(), &next, BUCKET_TTL)
                .await
            {
                Ok(true) => {
                    return if admit {
                        Decision::Admitted
                    } else {
                        Decision::Rejected
                    };
                }
                Ok(false) => continue,
                Err(err) => return self.outage(key, err),
            }
        }

        self.outage(
            key,
            StoreUnavailable::new("compare-and-swap contention exhausted"),
        )
    }

    /// Best-effort administrative clear; failures are logged, not returned.
    pub async fn reset(&self, key: &str) {
        if let Err(err) = self.store.remove(key).await {
            tracing::error!(key, error = %err, "failed to reset rate limiter bucket");
        }
    }

    fn outage(&self, key: &str, err: StoreUnavailable) -> Decision {
        tracing::error!(
            key,
            error = %err,
            fail_open = self.fail_open,
            "rate limiter store error"
        );
        if self.fail_open {
            Decision::FailedOpen { detail: err.detail }
        } else {
            Decision::FailedClosed { detail: err.detail }
        }
    }
}
