//! # Flowgate
//!
//! A distributed rate limiting core: decides, for a stream of concurrent
//! requests identified by a client key, whether each request may proceed
//! under a configured quota policy, and stays correct when enforced across
//! multiple processes sharing no memory.
//!
//! ## Features
//!
//! - **Six algorithms**: token bucket, leaky bucket, fixed window, sliding
//!   window log, sliding window counter, and adaptive (load-driven) limiting
//! - **Atomic state stores**: in-memory (DashMap) for single instances,
//!   Redis with versioned compare-and-swap for distributed deployments
//! - **Consistent-hash sharding**: client state partitioned across store
//!   instances, ~1/n of keys remapped on topology change
//! - **Tiers and bypass**: per-tier defaults, per-client overrides, and VIP
//!   policies that skip enforcement
//! - **Degraded modes**: per-policy fail-open/fail-closed when the shared
//!   store is unreachable; the caller always gets a verdict
//! - **Standard headers**: `X-RateLimit-Limit`, `X-RateLimit-Remaining`,
//!   `X-RateLimit-Reset`, `Retry-After`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowgate::{Algorithm, Policy, RateLimiter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = RateLimiter::builder()
//!     .policy(Policy::new(
//!         "api-default",
//!         Algorithm::TokenBucket {
//!             capacity: 100,
//!             refill_rate: 10.0,
//!         },
//!     )?)
//!     .build()
//!     .await?;
//!
//! let decision = limiter.check("user_123", "api-default").await?;
//! if decision.allowed {
//!     println!("allowed, {} remaining", decision.remaining);
//! } else {
//!     println!("limited, retry after {:?}", decision.retry_after);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Correctness model
//!
//! There is no ordering between checks for different client keys. For one
//! key, the store executes each check's read-modify-write as a single
//! indivisible step, so N concurrent checks behave like some serial ordering
//! of those checks; two concurrent spends can never both succeed against
//! quota that only covered one. When the store cannot answer within the
//! configured deadline, the engine does not guess at the real count: it
//! returns the policy's fail-open or fail-closed verdict and counts the
//! degraded decision.

pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod policy;
pub mod ring;
pub mod state;
pub mod stores;
pub mod tiers;

pub use algorithms::{Decision, LoadSignal, decide};
pub use config::{PolicySpec, RateLimiterBuilder, load_policies};
pub use error::{RateLimitError, RateLimitHeaders, RateLimitResult};
pub use policy::{Algorithm, FailMode, Policy};
pub use ring::HashRing;
pub use state::LimiterState;
pub use stores::{MemoryStore, ShardedStore, StateStore, StoreType};
pub use tiers::{PolicySet, TierManager};

#[cfg(feature = "redis")]
pub use stores::RedisStore;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// The decision engine
///
/// Resolves a client key and policy into an algorithm and a store, executes
/// one atomic check, and returns the verdict.
pub struct RateLimiter {
    store: Arc<dyn StateStore>,
    tiers: TierManager,
    load: LoadSignal,
    check_timeout: Duration,
    default_fail_mode: FailMode,
    degraded: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter builder
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::new()
    }

    /// Create a rate limiter from its parts
    pub fn new(
        store: Arc<dyn StateStore>,
        tiers: TierManager,
        load: LoadSignal,
        check_timeout: Duration,
        default_fail_mode: FailMode,
    ) -> Self {
        debug!(store = store.store_type(), "creating rate limiter");
        Self {
            store,
            tiers,
            load,
            check_timeout,
            default_fail_mode,
            degraded: AtomicU64::new(0),
        }
    }

    /// Check one request of cost 1 against a policy
    pub async fn check(&self, client_key: &str, policy_id: &str) -> RateLimitResult<Decision> {
        self.check_cost(client_key, policy_id, 1).await
    }

    /// Check one request of the given cost against a policy
    pub async fn check_cost(
        &self,
        client_key: &str,
        policy_id: &str,
        cost: u64,
    ) -> RateLimitResult<Decision> {
        let policy = self.tiers.policy(policy_id)?;
        self.enforce(client_key, &policy, cost).await
    }

    /// Check one request for a client on a resource, resolving the policy
    /// through tier mappings and overrides
    pub async fn check_client(
        &self,
        client_id: &str,
        resource: &str,
        cost: u64,
    ) -> RateLimitResult<Decision> {
        let policy = self.tiers.resolve(client_id, resource)?;
        self.enforce(client_id, &policy, cost).await
    }

    async fn enforce(
        &self,
        client_key: &str,
        policy: &Policy,
        cost: u64,
    ) -> RateLimitResult<Decision> {
        // Bypass policies never touch a store; this is a deliberate
        // fast path, not an error condition.
        if policy.bypass {
            trace!(client = %client_key, policy = %policy.id, "bypass policy, allowing");
            let now = clock::unix_now().ceil() as u64;
            return Ok(Decision::allowed(policy.capacity(), policy.capacity(), now));
        }

        if cost == 0 || cost > policy.capacity() {
            return Err(RateLimitError::InvalidCost {
                policy: policy.id.clone(),
                cost,
                capacity: policy.capacity(),
            });
        }

        let now = clock::unix_now();
        let load = self.load.value();
        let key = policy.state_key(client_key);
        let transition =
            move |state: Option<&LimiterState>| decide(state, policy, cost, now, load);

        let outcome = tokio::time::timeout(
            self.check_timeout,
            self.store.apply(&key, policy.state_ttl(), &transition),
        )
        .await;

        match outcome {
            Ok(Ok(decision)) => {
                trace!(
                    client = %client_key,
                    policy = %policy.id,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "rate limit check"
                );
                Ok(decision)
            }
            Ok(Err(error)) if error.is_degradable() => Ok(self.degraded_decision(policy, &error)),
            Ok(Err(error)) => Err(error),
            Err(_) => Ok(self.degraded_decision(
                policy,
                &RateLimitError::store(format!(
                    "store did not answer within {:?}",
                    self.check_timeout
                )),
            )),
        }
    }

    /// Verdict when the store cannot answer
    ///
    /// The caller still gets an allow/deny decision; the failure is visible
    /// through the degraded counter and the log, never as a panic or an
    /// error from normal operation.
    fn degraded_decision(&self, policy: &Policy, error: &RateLimitError) -> Decision {
        self.degraded.fetch_add(1, Ordering::Relaxed);
        let mode = policy.fail_mode.unwrap_or(self.default_fail_mode);
        warn!(
            policy = %policy.id,
            mode = ?mode,
            error = %error,
            "state store degraded, applying fail mode"
        );

        let now = clock::unix_now();
        let reset_at = (now + policy.algorithm.reset_horizon().as_secs_f64()).ceil() as u64;
        match mode {
            FailMode::Open => Decision::allowed(policy.capacity(), policy.capacity(), reset_at),
            FailMode::Closed => Decision::denied(
                0,
                policy.capacity(),
                reset_at,
                policy.algorithm.reset_horizon(),
            ),
        }
    }

    /// Number of checks answered in degraded mode since startup
    pub fn degraded_checks(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Feed a system-load observation in `[0, 1]` to adaptive policies
    pub fn observe_load(&self, sample: f64) {
        self.load.observe(sample);
    }

    /// The shared load signal, for wiring to an external sampler
    pub fn load_signal(&self) -> LoadSignal {
        self.load.clone()
    }

    /// Drop the state for a client under a policy
    pub async fn reset(&self, client_key: &str, policy_id: &str) -> RateLimitResult<()> {
        let policy = self.tiers.policy(policy_id)?;
        debug!(client = %client_key, policy = %policy_id, "resetting rate limit");
        self.store.reset(&policy.state_key(client_key)).await
    }

    /// Replace the policy configuration snapshot
    pub fn install_policies(&self, set: PolicySet) {
        self.tiers.install(set);
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.store.store_type())
            .field("tiers", &self.tiers)
            .field("check_timeout", &self.check_timeout)
            .finish()
    }
}
