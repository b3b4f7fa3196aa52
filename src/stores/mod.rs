//! Rate limit state stores
//!
//! A store owns the durable, shared, atomically-updatable state behind the
//! algorithms. The single must-not-violate contract is [`StateStore::apply`]:
//! a read-modify-write executed as one indivisible step per key even under
//! concurrent callers, so N concurrent checks on one key behave like some
//! serial ordering of those checks and a decrement is never lost.
//!
//! Implementations:
//!
//! - **Memory**: per-key entry locking inside one process (default)
//! - **Redis**: versioned compare-and-swap over a networked store
//! - **Sharded**: consistent-hash routing across several store instances

mod memory;
#[cfg(feature = "redis")]
mod redis;
mod sharded;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis::RedisStore;
pub use sharded::ShardedStore;

use crate::algorithms::Decision;
use crate::error::RateLimitResult;
use crate::state::LimiterState;
use async_trait::async_trait;
use std::time::Duration;

/// A pure state transition: current state in, next state and verdict out
///
/// Must be side-effect free. Optimistic stores re-invoke it when a
/// conditional write loses a race, so a transition that failed to commit
/// leaves nothing observable behind.
pub type Transition<'a> =
    &'a (dyn Fn(Option<&LimiterState>) -> (LimiterState, Decision) + Send + Sync);

/// Store type for rate limiting
#[derive(Debug, Clone, Default)]
pub enum StoreType {
    /// In-memory store (single instance only)
    #[default]
    Memory,
    /// Redis store (distributed)
    Redis,
    /// Multiple Redis instances behind consistent-hash routing
    ShardedRedis,
}

/// Trait for rate limit state stores
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Atomically transition the state under `key` and return the verdict
    ///
    /// The committed state expires after `ttl` of inactivity; expiry is owned
    /// by the store, not its callers.
    async fn apply(
        &self,
        key: &str,
        ttl: Duration,
        transition: Transition<'_>,
    ) -> RateLimitResult<Decision>;

    /// Drop the state held under `key`
    async fn reset(&self, key: &str) -> RateLimitResult<()>;

    /// Clean up expired entries (optional, for memory reclamation)
    async fn sweep(&self) -> RateLimitResult<()> {
        Ok(())
    }

    /// Get store type name for debugging
    fn store_type(&self) -> &'static str;
}
