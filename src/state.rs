//! Per-key limiter state
//!
//! One tagged union covers the state shape of every algorithm so the store
//! contract stays algorithm-agnostic. The serde representation is what the
//! remote store persists inside its versioned envelope.
//!
//! Timestamps are fractional Unix seconds; window and sub-window identifiers
//! are derived from wall-clock time on every check, never stored as a
//! "current window" pointer that could drift between nodes.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Algorithm-specific state for one `(client key, policy)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimiterState {
    /// Token bucket fill level
    TokenBucket {
        /// Tokens currently available
        tokens: f64,
        /// Unix seconds of the last refill
        last_refill: f64,
    },

    /// Leaky bucket level
    LeakyBucket {
        /// Current level, in request-cost units
        level: f64,
        /// Unix seconds of the last leak
        last_leak: f64,
    },

    /// Fixed window counter
    FixedWindow {
        /// Window identifier, `floor(now / window)`
        window_id: u64,
        /// Requests admitted in this window
        count: u64,
    },

    /// Sliding window log of admission timestamps
    SlidingLog {
        /// Unix seconds of each admitted request, oldest first
        timestamps: VecDeque<f64>,
    },

    /// Sliding window per-sub-window counts
    SlidingCounter {
        /// `(sub_window_id, count)` pairs, pruned on every access
        buckets: Vec<(u64, u64)>,
    },

    /// Adaptive limiter (token bucket with a load-driven rate)
    Adaptive {
        /// Tokens currently available
        tokens: f64,
        /// Unix seconds of the last refill
        last_refill: f64,
    },
}

impl LimiterState {
    /// State shape name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            LimiterState::TokenBucket { .. } => "token_bucket",
            LimiterState::LeakyBucket { .. } => "leaky_bucket",
            LimiterState::FixedWindow { .. } => "fixed_window",
            LimiterState::SlidingLog { .. } => "sliding_log",
            LimiterState::SlidingCounter { .. } => "sliding_counter",
            LimiterState::Adaptive { .. } => "adaptive",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_round_trip() {
        let state = LimiterState::TokenBucket {
            tokens: 7.5,
            last_refill: 1_700_000_000.25,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"kind\":\"token_bucket\""));
        let back: LimiterState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_sliding_log_serializes_ordered() {
        let state = LimiterState::SlidingLog {
            timestamps: VecDeque::from([1.0, 2.0, 3.0]),
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: LimiterState = serde_json::from_str(&json).unwrap();
        match back {
            LimiterState::SlidingLog { timestamps } => {
                assert_eq!(timestamps, VecDeque::from([1.0, 2.0, 3.0]));
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }
}
