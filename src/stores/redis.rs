//! Redis state store
//!
//! State for multi-instance deployments lives in Redis as a versioned JSON
//! envelope per key. An update reads the envelope, computes the transition
//! locally, and commits through a Lua compare-and-swap keyed on the envelope
//! version: if another node committed in between, the version no longer
//! matches, nothing is written, and the read-compute-write cycle retries
//! against fresh state up to a bounded attempt budget. A plain read-then-write
//! would lose concurrent decrements across the network round trip; the
//! version guard is what rules that out.
//!
//! Requires the `redis` feature to be enabled.

use crate::algorithms::Decision;
use crate::error::{RateLimitError, RateLimitResult};
use crate::state::LimiterState;
use crate::stores::{StateStore, Transition};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default bounded retry budget for the compare-and-swap loop
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Commit a new envelope only if the stored version still matches.
/// Returns 1 on commit, 0 on conflict.
const CAS_SCRIPT: &str = r#"
    local expected = tonumber(ARGV[1])
    local current = redis.call('GET', KEYS[1])
    local version = 0
    if current then
        version = tonumber(cjson.decode(current)['v'])
    end
    if version ~= expected then
        return 0
    end
    redis.call('SET', KEYS[1], ARGV[2], 'EX', tonumber(ARGV[3]))
    return 1
"#;

/// Versioned state envelope persisted per key
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    v: u64,
    state: LimiterState,
}

/// Redis-backed rate limit state store
pub struct RedisStore {
    /// Redis connection manager
    conn: ConnectionManager,
    /// Key prefix
    prefix: String,
    /// Compare-and-swap retry budget
    max_attempts: u32,
    /// Conditional-write script
    cas: redis::Script,
}

impl RedisStore {
    /// Create a new Redis store
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn new(url: &str) -> RateLimitResult<Self> {
        debug!(url = %url, "connecting to Redis for rate limiting");

        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            prefix: "ratelimit".to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            cas: redis::Script::new(CAS_SCRIPT),
        })
    }

    /// Create a new Redis store with a custom prefix
    pub async fn with_prefix(url: &str, prefix: impl Into<String>) -> RateLimitResult<Self> {
        let mut store = Self::new(url).await?;
        store.prefix = prefix.into();
        Ok(store)
    }

    /// Set the compare-and-swap retry budget
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Get the full key with prefix
    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    async fn read_envelope(
        &self,
        conn: &mut ConnectionManager,
        key: &str,
    ) -> RateLimitResult<(u64, Option<LimiterState>)> {
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| RateLimitError::store(e.to_string()))?;

        match raw {
            Some(raw) => match serde_json::from_str::<Envelope>(&raw) {
                Ok(envelope) => Ok((envelope.v, Some(envelope.state))),
                Err(e) => {
                    // A malformed envelope is replaced rather than wedging
                    // the key forever.
                    warn!(key = %key, error = %e, "discarding unreadable state envelope");
                    Ok((0, None))
                }
            },
            None => Ok((0, None)),
        }
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn apply(
        &self,
        key: &str,
        ttl: Duration,
        transition: Transition<'_>,
    ) -> RateLimitResult<Decision> {
        let full_key = self.key(key);
        let ttl_secs = ttl.as_secs().max(1);
        let mut conn = self.conn.clone();

        for attempt in 1..=self.max_attempts {
            let (version, state) = self.read_envelope(&mut conn, &full_key).await?;
            let (next_state, decision) = transition(state.as_ref());

            let payload = serde_json::to_string(&Envelope {
                v: version + 1,
                state: next_state,
            })
            .map_err(|e| RateLimitError::store(e.to_string()))?;

            let committed: i32 = self
                .cas
                .key(&full_key)
                .arg(version)
                .arg(payload)
                .arg(ttl_secs)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| RateLimitError::store(e.to_string()))?;

            if committed == 1 {
                trace!(key = %key, attempt = attempt, allowed = decision.allowed, "redis transition committed");
                return Ok(decision);
            }

            trace!(key = %key, attempt = attempt, "redis transition conflicted, retrying");
        }

        warn!(key = %key, attempts = self.max_attempts, "redis compare-and-swap budget exhausted");
        Err(RateLimitError::ConflictExhausted {
            key: key.to_string(),
            attempts: self.max_attempts,
        })
    }

    async fn reset(&self, key: &str) -> RateLimitResult<()> {
        debug!(key = %key, "resetting rate limit state in Redis");

        let mut conn = self.conn.clone();
        let _: () = conn
            .del(self.key(key))
            .await
            .map_err(|e| RateLimitError::store(e.to_string()))?;

        Ok(())
    }

    async fn sweep(&self) -> RateLimitResult<()> {
        debug!("redis sweep is automatic via TTL");
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    // Redis tests require a running Redis instance
    // Run with: cargo test --features redis -- --ignored

    use super::*;
    use crate::algorithms::decide;
    use crate::clock;
    use crate::policy::{Algorithm, Policy};

    fn bucket_policy(capacity: u64) -> Policy {
        Policy::new(
            "it",
            Algorithm::TokenBucket {
                capacity,
                refill_rate: 1.0,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_token_bucket_sequence() {
        let store = RedisStore::new("redis://localhost:6379").await.unwrap();
        let policy = bucket_policy(5);
        let ttl = policy.state_ttl();

        store.reset("it@v1:test").await.unwrap();

        for i in (0..5).rev() {
            let now = clock::unix_now();
            let transition =
                move |state: Option<&LimiterState>| decide(state, &bucket_policy(5), 1, now, 0.0);
            let decision = store.apply("it@v1:test", ttl, &transition).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, i);
        }

        let now = clock::unix_now();
        let transition =
            move |state: Option<&LimiterState>| decide(state, &bucket_policy(5), 1, now, 0.0);
        let decision = store.apply("it@v1:test", ttl, &transition).await.unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_reset() {
        let store = RedisStore::new("redis://localhost:6379").await.unwrap();
        let policy = bucket_policy(1);
        let ttl = policy.state_ttl();

        store.reset("it@v1:reset").await.unwrap();

        let now = clock::unix_now();
        let transition =
            move |state: Option<&LimiterState>| decide(state, &bucket_policy(1), 1, now, 0.0);
        assert!(store.apply("it@v1:reset", ttl, &transition).await.unwrap().allowed);
        assert!(!store.apply("it@v1:reset", ttl, &transition).await.unwrap().allowed);

        store.reset("it@v1:reset").await.unwrap();
        assert!(store.apply("it@v1:reset", ttl, &transition).await.unwrap().allowed);
    }
}
