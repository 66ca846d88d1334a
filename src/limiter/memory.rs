//! In-process bucket store for tests and single-node deployments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::Clock;

use super::{BucketRecord, BucketStore, StoreUnavailable};

pub struct MemoryBucketStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    record: BucketRecord,
    expires_at_ms: u64,
}

impl MemoryBucketStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn live_record(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        now_ms: u64,
    ) -> Option<BucketRecord> {
        match entries.get(key) {
            Some(entry) if entry.expires_at_ms > now_ms => Some(entry.record),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

// Exact equality: the CAS guard must only pass against the very record the
// caller loaded, so tokens are compared bit-for-bit.
fn same_record(a: &BucketRecord, b: &BucketRecord) -> bool {
    a.tokens.to_bits() == b.tokens.to_bits() && a.last_refill_ms == b.last_refill_ms
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn load(&self, key: &str) -> Result<Option<BucketRecord>, StoreUnavailable> {
        let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        Ok(Self::live_record(
            &mut entries,
            key,
            self.clock.now_epoch_millis(),
        ))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&BucketRecord>,
        next: &BucketRecord,
        ttl: Duration,
    ) -> Result<bool, StoreUnavailable> {
        let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        let now_ms = self.clock.now_epoch_millis();
        let current = Self::live_record(&mut entries, key, now_ms);

        let guard_holds = match (current.as_ref(), expected) {
            (None, None) => true,
            (Some(current), Some(expected)) => same_record(current, expected),
            _ => false,
        };
        if !guard_holds {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                record: *next,
                expires_at_ms: now_ms.saturating_add(ttl.as_millis() as u64),
            },
        );
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreUnavailable> {
        self.entries
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;

    const TTL: Duration = Duration::from_secs(60);

    fn store() -> (MemoryBucketStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (MemoryBucketStore::new(clock.clone()), clock)
    }

    fn record(tokens: f64, last_refill_ms: u64) -> BucketRecord {
        BucketRecord {
            tokens,
            last_refill_ms,
        }
    }

    #[tokio::test]
    async fn cas_against_absent_key_requires_none_expected() {
        let (store, _clock) = store();
        let next = record(5.0, 1_000_000);

        assert!(
            !store
                .compare_and_swap("k", Some(&next), &next, TTL)
                .await
                .unwrap()
        );
        assert!(store.compare_and_swap("k", None, &next, TTL).await.unwrap());
        assert_eq!(store.load("k").await.unwrap(), Some(next));
    }

    #[tokio::test]
    async fn cas_fails_when_the_record_moved() {
        let (store, _clock) = store();
        let first = record(5.0, 1_000_000);
        assert!(
            store
                .compare_and_swap("k", None, &first, TTL)
                .await
                .unwrap()
        );

        let stale = record(4.0, 1_000_000);
        let next = record(3.0, 1_000_500);
        assert!(
            !store
                .compare_and_swap("k", Some(&stale), &next, TTL)
                .await
                .unwrap()
        );
        assert!(
            store
                .compare_and_swap("k", Some(&first), &next, TTL)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn entries_expire_after_the_ttl() {
        let (store, clock) = store();
        let rec = record(2.0, 1_000_000);
        assert!(store.compare_and_swap("k", None, &rec, TTL).await.unwrap());
        assert_eq!(store.load("k").await.unwrap(), Some(rec));

        clock.advance_secs(61);
        assert_eq!(store.load("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn writes_refresh_the_ttl() {
        let (store, clock) = store();
        let first = record(2.0, 1_000_000);
        assert!(
            store
                .compare_and_swap("k", None, &first, TTL)
                .await
                .unwrap()
        );

        clock.advance_secs(59);
        let second = record(1.0, clock.now_epoch_millis());
        assert!(
            store
                .compare_and_swap("k", Some(&first), &second, TTL)
                .await
                .unwrap()
        );

        clock.advance_secs(59);
        assert_eq!(store.load("k").await.unwrap(), Some(second));
    }
}
