//! Rate limit policies
//!
//! A [`Policy`] is the immutable description of one quota rule: which
//! algorithm enforces it, with what parameters, and for which tier. Policies
//! are versioned; state written under one `(id, version)` pair is never
//! reinterpreted under another, a version bump simply addresses a fresh state
//! slot in the store.

use crate::error::{RateLimitError, RateLimitResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate limiting algorithm configuration
///
/// This is a closed set: exactly six algorithms, dispatched by the policy
/// that carries them. Adding a seventh is a deliberate extension of this
/// enum, not a plug-in point.
#[derive(Debug, Clone, PartialEq)]
pub enum Algorithm {
    /// Token bucket algorithm
    ///
    /// Tokens are added at a fixed rate and consumed on each request.
    /// Allows bursts up to the bucket capacity.
    TokenBucket {
        /// Maximum number of tokens (burst capacity)
        capacity: u64,
        /// Tokens added per second (zero means the bucket never refills)
        refill_rate: f64,
    },

    /// Leaky bucket algorithm
    ///
    /// The bucket level rises by the request cost and drains at a constant
    /// rate. Caps sustained throughput regardless of input burstiness.
    LeakyBucket {
        /// Maximum bucket level
        capacity: u64,
        /// Level drained per second
        leak_rate: f64,
    },

    /// Fixed window algorithm
    ///
    /// Counts requests per window identified by `floor(now / window)`.
    /// Simple, but up to twice the capacity can pass across a window
    /// boundary; callers needing a strict bound should use one of the
    /// sliding variants.
    FixedWindow {
        /// Maximum requests allowed per window
        capacity: u64,
        /// Window duration
        window: Duration,
    },

    /// Sliding window log algorithm
    ///
    /// Tracks individual request timestamps within a sliding window.
    /// Exact, at O(capacity) state per key.
    SlidingWindowLog {
        /// Maximum requests allowed in the window
        capacity: u64,
        /// Window duration
        window: Duration,
    },

    /// Sliding window counter algorithm
    ///
    /// Approximates the log algorithm with per-sub-window counts, weighting
    /// the oldest partially-overlapping sub-window proportionally.
    SlidingWindowCounter {
        /// Maximum requests allowed in the window
        capacity: u64,
        /// Window duration
        window: Duration,
        /// Number of sub-windows the window is divided into
        sub_windows: u32,
    },

    /// Adaptive algorithm
    ///
    /// A token bucket whose effective refill rate follows an externally
    /// observed system load: full load drops the rate to `min_rate`, an idle
    /// system gets `max_rate`.
    Adaptive {
        /// Maximum number of tokens (burst capacity)
        capacity: u64,
        /// Refill rate under full load
        min_rate: f64,
        /// Refill rate when idle
        max_rate: f64,
    },
}

/// Default sub-window count for the sliding window counter
pub const DEFAULT_SUB_WINDOWS: u32 = 10;

impl Algorithm {
    /// Get the effective limit for this algorithm
    pub fn limit(&self) -> u64 {
        match self {
            Algorithm::TokenBucket { capacity, .. }
            | Algorithm::LeakyBucket { capacity, .. }
            | Algorithm::FixedWindow { capacity, .. }
            | Algorithm::SlidingWindowLog { capacity, .. }
            | Algorithm::SlidingWindowCounter { capacity, .. }
            | Algorithm::Adaptive { capacity, .. } => *capacity,
        }
    }

    /// Short algorithm name, matching the configuration schema
    pub fn kind(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket { .. } => "token_bucket",
            Algorithm::LeakyBucket { .. } => "leaky_bucket",
            Algorithm::FixedWindow { .. } => "fixed_window",
            Algorithm::SlidingWindowLog { .. } => "sliding_log",
            Algorithm::SlidingWindowCounter { .. } => "sliding_counter",
            Algorithm::Adaptive { .. } => "adaptive",
        }
    }

    /// Time for a fully drained limit to recover, used for reset estimates
    /// and store TTLs
    pub fn reset_horizon(&self) -> Duration {
        match self {
            Algorithm::TokenBucket {
                capacity,
                refill_rate,
            } => rate_horizon(*capacity, *refill_rate),
            Algorithm::LeakyBucket {
                capacity,
                leak_rate,
            } => rate_horizon(*capacity, *leak_rate),
            Algorithm::FixedWindow { window, .. }
            | Algorithm::SlidingWindowLog { window, .. }
            | Algorithm::SlidingWindowCounter { window, .. } => *window,
            Algorithm::Adaptive {
                capacity, min_rate, ..
            } => rate_horizon(*capacity, *min_rate),
        }
    }

    fn validate(&self) -> RateLimitResult<()> {
        if self.limit() == 0 {
            return Err(RateLimitError::config("capacity must be greater than 0"));
        }
        match self {
            Algorithm::TokenBucket { refill_rate, .. } => {
                if !refill_rate.is_finite() || *refill_rate < 0.0 {
                    return Err(RateLimitError::config(
                        "refill rate must be finite and non-negative",
                    ));
                }
            }
            Algorithm::LeakyBucket { leak_rate, .. } => {
                if !leak_rate.is_finite() || *leak_rate <= 0.0 {
                    return Err(RateLimitError::config("leak rate must be greater than 0"));
                }
            }
            Algorithm::FixedWindow { window, .. } | Algorithm::SlidingWindowLog { window, .. } => {
                if window.is_zero() {
                    return Err(RateLimitError::config("window must be greater than 0"));
                }
            }
            Algorithm::SlidingWindowCounter {
                window,
                sub_windows,
                ..
            } => {
                if window.is_zero() {
                    return Err(RateLimitError::config("window must be greater than 0"));
                }
                if *sub_windows == 0 {
                    return Err(RateLimitError::config(
                        "sub-window count must be greater than 0",
                    ));
                }
            }
            Algorithm::Adaptive {
                min_rate, max_rate, ..
            } => {
                if !min_rate.is_finite() || *min_rate <= 0.0 {
                    return Err(RateLimitError::config("min rate must be greater than 0"));
                }
                if !max_rate.is_finite() || max_rate < min_rate {
                    return Err(RateLimitError::config(
                        "max rate must be at least the min rate",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Horizon for rate-based algorithms; a zero or vanishing rate never
/// recovers in practice, so state for such a policy is kept for an hour of
/// inactivity instead.
fn rate_horizon(capacity: u64, rate: f64) -> Duration {
    if rate > 0.0 {
        Duration::try_from_secs_f64(capacity as f64 / rate)
            .unwrap_or_else(|_| Duration::from_secs(3600))
    } else {
        Duration::from_secs(3600)
    }
}

/// Behavior when the shared state store cannot answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Allow the request and log the degraded decision
    #[default]
    Open,
    /// Deny the request until the store recovers
    Closed,
}

/// An immutable quota rule
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// Policy identifier, referenced by checks and tier mappings
    pub id: String,
    /// Version; bumping it addresses a fresh state slot in the store
    pub version: u32,
    /// Algorithm enforcing this policy
    pub algorithm: Algorithm,
    /// Tier this policy belongs to
    pub tier: String,
    /// Bypass policies skip enforcement entirely
    pub bypass: bool,
    /// Store-failure behavior; falls back to the engine default when unset
    pub fail_mode: Option<FailMode>,
}

impl Policy {
    /// Create a policy, validating the algorithm parameters
    pub fn new(id: impl Into<String>, algorithm: Algorithm) -> RateLimitResult<Self> {
        algorithm.validate()?;
        Ok(Self {
            id: id.into(),
            version: 1,
            algorithm,
            tier: "default".to_string(),
            bypass: false,
            fail_mode: None,
        })
    }

    /// Create a bypass policy
    ///
    /// The algorithm is never consulted for bypass policies; checks return
    /// allowed without touching any state store.
    pub fn bypass(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 1,
            algorithm: Algorithm::TokenBucket {
                capacity: u64::MAX,
                refill_rate: 0.0,
            },
            tier: "default".to_string(),
            bypass: true,
            fail_mode: None,
        }
    }

    /// Set the policy version
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Set the tier name
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = tier.into();
        self
    }

    /// Set a per-policy fail mode
    pub fn with_fail_mode(mut self, mode: FailMode) -> Self {
        self.fail_mode = Some(mode);
        self
    }

    /// Maximum requests this policy admits at once
    pub fn capacity(&self) -> u64 {
        self.algorithm.limit()
    }

    /// State key for a client under this policy
    ///
    /// The version is part of the key, so state computed under an old policy
    /// version is never read back under a new one.
    pub fn state_key(&self, client_key: &str) -> String {
        format!("{}@v{}:{}", self.id, self.version, client_key)
    }

    /// How long idle state for this policy stays relevant
    ///
    /// Stores expire state after this duration of inactivity; the small
    /// multiplier leaves room for in-flight reads near the horizon.
    pub fn state_ttl(&self) -> Duration {
        let horizon = self.algorithm.reset_horizon();
        horizon.saturating_mul(2).max(Duration::from_secs(1))
    }
}
