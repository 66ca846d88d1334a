//! Redis-backed bucket store. The compare-and-swap runs as a Lua script so
//! the guard and the write are one atomic step for every gateway instance
//! sharing the database.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use super::{BucketRecord, BucketStore, StoreUnavailable};

const CAS_SCRIPT: &str = r#"
local cur_tokens = redis.call("HGET", KEYS[1], "tokens")
local cur_last = redis.call("HGET", KEYS[1], "last")

if ARGV[1] == "" then
  if cur_tokens then
    return 0
  end
elseif cur_tokens ~= ARGV[1] or cur_last ~= ARGV[2] then
  return 0
end

redis.call("HSET", KEYS[1], "tokens", ARGV[3], "last", ARGV[4])
redis.call("PEXPIRE", KEYS[1], ARGV[5])
return 1
"#;

#[derive(Clone, Debug)]
pub struct RedisBucketStore {
    client: redis::Client,
    prefix: String,
}

impl RedisBucketStore {
    pub fn new(url: impl AsRef<str>) -> Result<Self, StoreUnavailable> {
        Ok(Self {
            client: redis::Client::open(url.as_ref())
                .map_err(|err| StoreUnavailable::new(err.to_string()))?,
            prefix: "ratelimit".to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub async fn ping(&self) -> Result<(), StoreUnavailable> {
        let mut conn = self.connection().await?;
        let _: Option<String> = conn
            .get(format!("{}:__ping__", self.prefix))
            .await
            .map_err(|err| StoreUnavailable::new(err.to_string()))?;
        Ok(())
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreUnavailable> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| StoreUnavailable::new(err.to_string()))
    }

    fn bucket_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

// Tokens are stored as the shortest round-tripping decimal string, so the
// CAS guard can compare the exact bytes it previously wrote.
fn format_tokens(tokens: f64) -> String {
    format!("{tokens}")
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn load(&self, key: &str) -> Result<Option<BucketRecord>, StoreUnavailable> {
        let mut conn = self.connection().await?;
        let (tokens, last): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(self.bucket_key(key))
            .arg("tokens")
            .arg("last")
            .query_async(&mut conn)
            .await
            .map_err(|err| StoreUnavailable::new(err.to_string()))?;

        match (tokens, last) {
            (Some(tokens), Some(last)) => {
                let tokens = tokens
                    .parse::<f64>()
                    .map_err(|_| StoreUnavailable::new("malformed bucket record"))?;
                let last_refill_ms = last
                    .parse::<u64>()
                    .map_err(|_| StoreUnavailable::new("malformed bucket record"))?;
                Ok(Some(BucketRecord {
                    tokens,
                    last_refill_ms,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&BucketRecord>,
        next: &BucketRecord,
        ttl: Duration,
    ) -> Result<bool, StoreUnavailable> {
        let mut conn = self.connection().await?;
        let (expected_tokens, expected_last) = match expected {
            Some(record) => (format_tokens(record.tokens), record.last_refill_ms.to_string()),
            None => (String::new(), String::new()),
        };

        let swapped: i64 = redis::Script::new(CAS_SCRIPT)
            .key(self.bucket_key(key))
            .arg(expected_tokens)
            .arg(expected_last)
            .arg(format_tokens(next.tokens))
            .arg(next.last_refill_ms.to_string())
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| StoreUnavailable::new(err.to_string()))?;
        Ok(swapped == 1)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreUnavailable> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(self.bucket_key(key))
            .await
            .map_err(|err| StoreUnavailable::new(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_formatting_round_trips() {
        for tokens in [0.0, 1.0, 59.0, 59.966_666_666_666_67, 0.033_333_333_333_333_33] {
            let rendered = format_tokens(tokens);
            assert_eq!(rendered.parse::<f64>().unwrap(), tokens);
            assert_eq!(format_tokens(rendered.parse::<f64>().unwrap()), rendered);
        }
    }

    #[test]
    fn bucket_keys_are_prefixed() {
        let store = RedisBucketStore::new("redis://localhost:6379").expect("client");
        assert_eq!(store.bucket_key("caller-1"), "ratelimit:caller-1");
        let store = store.with_prefix("tempo_test");
        assert_eq!(store.bucket_key("caller-1"), "tempo_test:caller-1");
    }
}
