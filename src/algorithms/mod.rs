//! Rate limiting algorithms
//!
//! Six interchangeable decision algorithms sharing one contract: given the
//! current state (if any), the policy, the requested cost, and the current
//! time, produce the next state and a verdict.
//!
//! Every algorithm is a pure function. No algorithm holds mutable fields;
//! mutable state lives only behind the store's atomic-update contract, so a
//! transition that fails to commit leaves no observable change and can be
//! re-applied against fresh state.

mod adaptive;
mod fixed_window;
mod leaky_bucket;
mod sliding_counter;
mod sliding_log;
mod token_bucket;

pub use adaptive::LoadSignal;

use crate::clock;
use crate::error::{RateLimitHeaders, retry_after_secs};
use crate::policy::{Algorithm, Policy};
use crate::state::LimiterState;
use std::time::Duration;

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Remaining quota after this decision
    pub remaining: u64,
    /// Maximum requests allowed
    pub limit: u64,
    /// When the quota is fully restored (Unix timestamp in seconds)
    pub reset_at: u64,
    /// Time until a request of this cost could succeed (denials only)
    pub retry_after: Option<Duration>,
}

impl Decision {
    /// Create an allowed decision
    pub fn allowed(remaining: u64, limit: u64, reset_at: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            limit,
            reset_at,
            retry_after: None,
        }
    }

    /// Create a denied decision
    pub fn denied(remaining: u64, limit: u64, reset_at: u64, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining,
            limit,
            reset_at,
            retry_after: Some(retry_after),
        }
    }

    /// HTTP header fields for this decision
    pub fn headers(&self) -> RateLimitHeaders {
        if self.allowed {
            RateLimitHeaders::allowed(self.limit, self.remaining, self.reset_at)
        } else {
            RateLimitHeaders::denied(
                self.limit,
                self.reset_at,
                self.retry_after.map(retry_after_secs).unwrap_or(1),
            )
        }
    }
}

/// Apply one check against a policy
///
/// `state` is whatever the store currently holds for the key; `None` means
/// the first request for this `(client, policy)` pair. State written by a
/// different algorithm (or a corrupt entry) is replaced with fresh state.
/// `load` is the smoothed system load in `[0, 1]`; only the adaptive
/// algorithm reads it.
pub fn decide(
    state: Option<&LimiterState>,
    policy: &Policy,
    cost: u64,
    now: f64,
    load: f64,
) -> (LimiterState, Decision) {
    match &policy.algorithm {
        Algorithm::TokenBucket {
            capacity,
            refill_rate,
        } => token_bucket::decide(state, *capacity, *refill_rate, cost, now),
        Algorithm::LeakyBucket {
            capacity,
            leak_rate,
        } => leaky_bucket::decide(state, *capacity, *leak_rate, cost, now),
        Algorithm::FixedWindow { capacity, window } => {
            fixed_window::decide(state, *capacity, window.as_secs_f64(), cost, now)
        }
        Algorithm::SlidingWindowLog { capacity, window } => {
            sliding_log::decide(state, *capacity, window.as_secs_f64(), cost, now)
        }
        Algorithm::SlidingWindowCounter {
            capacity,
            window,
            sub_windows,
        } => sliding_counter::decide(
            state,
            *capacity,
            window.as_secs_f64(),
            *sub_windows,
            cost,
            now,
        ),
        Algorithm::Adaptive {
            capacity,
            min_rate,
            max_rate,
        } => adaptive::decide(state, *capacity, *min_rate, *max_rate, load, cost, now),
    }
}

/// Unix timestamp `secs` from now, rounded up
pub(crate) fn reset_timestamp(now: f64, secs_until_reset: f64) -> u64 {
    (now + secs_until_reset.max(0.0)).ceil() as u64
}

/// Retry horizon from fractional seconds; anything outside `Duration`'s
/// range (a near-zero rate against a large deficit) means "not soon" and
/// clamps to `Duration::MAX` instead of panicking.
pub(crate) fn retry_horizon(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

pub(crate) use clock::elapsed;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Algorithm;

    fn policy(algorithm: Algorithm) -> Policy {
        Policy::new("test", algorithm).unwrap()
    }

    #[test]
    fn test_dispatch_matches_policy_algorithm() {
        let now = 1_000_000.0;
        let cases = [
            (
                Algorithm::TokenBucket {
                    capacity: 5,
                    refill_rate: 1.0,
                },
                "token_bucket",
            ),
            (
                Algorithm::LeakyBucket {
                    capacity: 5,
                    leak_rate: 1.0,
                },
                "leaky_bucket",
            ),
            (
                Algorithm::FixedWindow {
                    capacity: 5,
                    window: Duration::from_secs(10),
                },
                "fixed_window",
            ),
            (
                Algorithm::SlidingWindowLog {
                    capacity: 5,
                    window: Duration::from_secs(10),
                },
                "sliding_log",
            ),
            (
                Algorithm::SlidingWindowCounter {
                    capacity: 5,
                    window: Duration::from_secs(10),
                    sub_windows: 10,
                },
                "sliding_counter",
            ),
            (
                Algorithm::Adaptive {
                    capacity: 5,
                    min_rate: 1.0,
                    max_rate: 2.0,
                },
                "adaptive",
            ),
        ];

        for (algorithm, kind) in cases {
            let (state, decision) = decide(None, &policy(algorithm), 1, now, 0.0);
            assert_eq!(state.kind(), kind);
            assert!(decision.allowed);
        }
    }

    #[test]
    fn test_foreign_state_is_replaced() {
        // A fixed-window policy handed token-bucket state starts fresh.
        let stale = LimiterState::TokenBucket {
            tokens: 0.0,
            last_refill: 999_999.0,
        };
        let p = policy(Algorithm::FixedWindow {
            capacity: 3,
            window: Duration::from_secs(10),
        });
        let (state, decision) = decide(Some(&stale), &p, 1, 1_000_000.0, 0.0);
        assert_eq!(state.kind(), "fixed_window");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[test]
    fn test_decision_headers_mapping() {
        let allowed = Decision::allowed(4, 10, 1_000);
        let headers = allowed.headers();
        assert_eq!(headers.limit, 10);
        assert_eq!(headers.remaining, 4);
        assert_eq!(headers.retry_after, None);

        let denied = Decision::denied(0, 10, 1_000, Duration::from_millis(1500));
        let headers = denied.headers();
        assert_eq!(headers.remaining, 0);
        assert_eq!(headers.retry_after, Some(2));
    }
}
