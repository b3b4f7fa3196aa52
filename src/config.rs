//! Configuration and builder
//!
//! Policies arrive from external configuration as flat records; this module
//! deserializes and validates them into [`Policy`] values and provides the
//! builder that assembles a [`RateLimiter`](crate::RateLimiter) from
//! policies, tier mappings, a store, and runtime settings.

use crate::RateLimiter;
use crate::algorithms::LoadSignal;
use crate::error::{RateLimitError, RateLimitResult};
use crate::policy::{Algorithm, DEFAULT_SUB_WINDOWS, FailMode, Policy};
use crate::ring::DEFAULT_VIRTUAL_NODES;
use crate::stores::{MemoryStore, StateStore, StoreType};
use crate::tiers::{PolicySet, PolicySetBuilder, TierManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default per-call deadline against remote stores
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_millis(250);

/// One policy record in external configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Policy identifier
    pub policy_id: String,
    /// Policy version (defaults to 1)
    #[serde(default = "default_version")]
    pub version: u32,
    /// Algorithm name: `token_bucket`, `leaky_bucket`, `fixed_window`,
    /// `sliding_log`, `sliding_counter`, or `adaptive`
    pub algorithm: String,
    /// Capacity / maximum requests
    pub capacity: u64,
    /// Refill or leak rate in units per second
    #[serde(default)]
    pub rate_per_second: Option<f64>,
    /// Window length for window-based algorithms
    #[serde(default)]
    pub window_seconds: Option<f64>,
    /// Sub-window count for `sliding_counter`
    #[serde(default)]
    pub sub_windows: Option<u32>,
    /// Refill rate under full load (`adaptive` only)
    #[serde(default)]
    pub min_rate: Option<f64>,
    /// Refill rate when idle (`adaptive` only)
    #[serde(default)]
    pub max_rate: Option<f64>,
    /// Tier this policy belongs to
    pub tier: String,
    /// Skip enforcement entirely for this policy
    #[serde(default)]
    pub bypass: bool,
    /// Store-failure behavior for this policy
    #[serde(default)]
    pub fail_mode: Option<FailMode>,
}

fn default_version() -> u32 {
    1
}

impl PolicySpec {
    /// Convert into a validated [`Policy`]
    pub fn into_policy(self) -> RateLimitResult<Policy> {
        if self.bypass {
            return Ok(Policy::bypass(self.policy_id)
                .with_version(self.version)
                .with_tier(self.tier));
        }

        let rate = |field: &str| {
            self.rate_per_second
                .ok_or_else(|| RateLimitError::config(format!("{} requires rate_per_second", field)))
        };
        let window = |field: &str| {
            self.window_seconds
                .filter(|w| *w > 0.0)
                .and_then(|w| Duration::try_from_secs_f64(w).ok())
                .ok_or_else(|| {
                    RateLimitError::config(format!("{} requires a positive window_seconds", field))
                })
        };

        let algorithm = match self.algorithm.as_str() {
            "token_bucket" => Algorithm::TokenBucket {
                capacity: self.capacity,
                refill_rate: rate("token_bucket")?,
            },
            "leaky_bucket" => Algorithm::LeakyBucket {
                capacity: self.capacity,
                leak_rate: rate("leaky_bucket")?,
            },
            "fixed_window" => Algorithm::FixedWindow {
                capacity: self.capacity,
                window: window("fixed_window")?,
            },
            "sliding_log" => Algorithm::SlidingWindowLog {
                capacity: self.capacity,
                window: window("sliding_log")?,
            },
            "sliding_counter" => Algorithm::SlidingWindowCounter {
                capacity: self.capacity,
                window: window("sliding_counter")?,
                sub_windows: self.sub_windows.unwrap_or(DEFAULT_SUB_WINDOWS),
            },
            "adaptive" => Algorithm::Adaptive {
                capacity: self.capacity,
                min_rate: self.min_rate.ok_or_else(|| {
                    RateLimitError::config("adaptive requires min_rate")
                })?,
                max_rate: self.max_rate.ok_or_else(|| {
                    RateLimitError::config("adaptive requires max_rate")
                })?,
            },
            other => {
                return Err(RateLimitError::config(format!(
                    "unknown algorithm: {}",
                    other
                )));
            }
        };

        let mut policy = Policy::new(self.policy_id, algorithm)?
            .with_version(self.version)
            .with_tier(self.tier);
        policy.fail_mode = self.fail_mode;
        Ok(policy)
    }
}

/// Parse a JSON array of policy records
pub fn load_policies(json: &str) -> RateLimitResult<Vec<Policy>> {
    let specs: Vec<PolicySpec> =
        serde_json::from_str(json).map_err(|e| RateLimitError::config(e.to_string()))?;
    specs.into_iter().map(PolicySpec::into_policy).collect()
}

/// Builder for creating a [`RateLimiter`]
pub struct RateLimiterBuilder {
    policies: PolicySetBuilder,
    store_type: StoreType,
    custom_store: Option<Arc<dyn StateStore>>,
    check_timeout: Duration,
    default_fail_mode: FailMode,
    virtual_nodes: u32,
    #[cfg(feature = "redis")]
    redis_urls: Vec<(String, String)>,
}

impl RateLimiterBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            policies: PolicySet::builder(),
            store_type: StoreType::Memory,
            custom_store: None,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            default_fail_mode: FailMode::Open,
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            #[cfg(feature = "redis")]
            redis_urls: Vec::new(),
        }
    }

    /// Register a policy
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policies = self.policies.policy(policy);
        self
    }

    /// Register several policies
    pub fn policies(mut self, policies: impl IntoIterator<Item = Policy>) -> Self {
        for policy in policies {
            self.policies = self.policies.policy(policy);
        }
        self
    }

    /// Assign a client to a tier
    pub fn client_tier(mut self, client_id: impl Into<String>, tier: impl Into<String>) -> Self {
        self.policies = self.policies.client_tier(client_id, tier);
        self
    }

    /// Override the policy for one client
    pub fn client_override(
        mut self,
        client_id: impl Into<String>,
        policy_id: impl Into<String>,
    ) -> Self {
        self.policies = self.policies.client_override(client_id, policy_id);
        self
    }

    /// Override the policy for one client on one resource
    pub fn resource_override(
        mut self,
        client_id: impl Into<String>,
        resource: impl Into<String>,
        policy_id: impl Into<String>,
    ) -> Self {
        self.policies = self.policies.resource_override(client_id, resource, policy_id);
        self
    }

    /// Set the global fallback policy
    pub fn default_policy(mut self, policy_id: impl Into<String>) -> Self {
        self.policies = self.policies.default_policy(policy_id);
        self
    }

    /// Use the in-memory store (default)
    pub fn memory_store(mut self) -> Self {
        self.store_type = StoreType::Memory;
        self
    }

    /// Use a single Redis instance
    #[cfg(feature = "redis")]
    pub fn redis_store(mut self, url: impl Into<String>) -> Self {
        self.store_type = StoreType::Redis;
        self.redis_urls = vec![("node-0".to_string(), url.into())];
        self
    }

    /// Shard state across several Redis instances by consistent hashing
    #[cfg(feature = "redis")]
    pub fn sharded_redis_store(
        mut self,
        nodes: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.store_type = StoreType::ShardedRedis;
        self.redis_urls = nodes
            .into_iter()
            .map(|(id, url)| (id.into(), url.into()))
            .collect();
        self
    }

    /// Use a caller-provided store
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.custom_store = Some(store);
        self
    }

    /// Per-call deadline against the store
    pub fn check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Fail mode for policies that do not set their own
    pub fn fail_mode(mut self, mode: FailMode) -> Self {
        self.default_fail_mode = mode;
        self
    }

    /// Virtual nodes per shard on the hash ring
    pub fn virtual_nodes(mut self, count: u32) -> Self {
        self.virtual_nodes = count;
        self
    }

    /// Build the rate limiter
    pub async fn build(self) -> RateLimitResult<RateLimiter> {
        let set = self.policies.build()?;

        debug!(
            store = ?self.store_type,
            timeout = ?self.check_timeout,
            "building rate limiter"
        );

        let store: Arc<dyn StateStore> = match (self.custom_store, self.store_type) {
            (Some(store), _) => store,
            (None, StoreType::Memory) => Arc::new(MemoryStore::new()),
            #[cfg(feature = "redis")]
            (None, StoreType::Redis) => {
                let (_, url) = self.redis_urls.first().ok_or_else(|| {
                    RateLimitError::config("redis store requires a connection URL")
                })?;
                Arc::new(crate::stores::RedisStore::new(url).await?)
            }
            #[cfg(feature = "redis")]
            (None, StoreType::ShardedRedis) => {
                if self.redis_urls.is_empty() {
                    return Err(RateLimitError::config(
                        "sharded redis store requires at least one node",
                    ));
                }
                let sharded = crate::stores::ShardedStore::new(self.virtual_nodes);
                for (node_id, url) in &self.redis_urls {
                    sharded.add_shard(
                        node_id.clone(),
                        Arc::new(crate::stores::RedisStore::new(url).await?),
                    );
                }
                Arc::new(sharded)
            }
            #[cfg(not(feature = "redis"))]
            (None, StoreType::Redis | StoreType::ShardedRedis) => {
                return Err(RateLimitError::config(
                    "redis feature is not enabled; add the `redis` feature to use Redis stores",
                ));
            }
        };

        Ok(RateLimiter::new(
            store,
            TierManager::new(set),
            LoadSignal::new(),
            self.check_timeout,
            self.default_fail_mode,
        ))
    }
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
