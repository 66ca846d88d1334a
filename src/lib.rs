//! Admission-control and metering gateway for the Tempo navigation
//! assistant: API-key authentication, a distributed token-bucket rate
//! limiter, request/latency/cost metrics, and structural validation of
//! AI-backend output.

pub mod ai;
pub mod auth;
pub mod config;
mod error;
pub mod http;
pub mod limiter;
pub mod metrics;
#[cfg(feature = "otel")]
pub mod otel;
pub mod validate;

pub use ai::{BackendError, Completion, GeminiClient, GenerativeBackend};
pub use config::{GatewayConfig, RuntimeMode};
pub use error::GatewayError;
pub use http::{AppState, router};
#[cfg(feature = "store-redis")]
pub use limiter::RedisBucketStore;
pub use limiter::{BucketRecord, BucketStore, Decision, MemoryBucketStore, RateLimiter};
pub use metrics::{CostAlert, MetricsSink};

/// Time source for the limiter; injected so refill behavior is testable.
pub trait Clock: Send + Sync {
    fn now_epoch_millis(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: std::sync::atomic::AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: std::sync::atomic::AtomicU64::new(start_millis),
        }
    }

    pub fn advance_millis(&self, millis: u64) {
        self.millis
            .fetch_add(millis, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_millis(secs * 1000);
    }
}

impl Clock for ManualClock {
    fn now_epoch_millis(&self) -> u64 {
        self.millis.load(std::sync::atomic::Ordering::SeqCst)
    }
}
