//! Adaptive Algorithm
//!
//! A token bucket whose effective refill rate tracks an externally observed
//! system load. At zero load clients refill at `max_rate`; at full load the
//! rate drops to `min_rate`, linearly interpolated in between. This protects
//! a downstream resource whose real capacity fluctuates, instead of
//! enforcing a fixed contract while the resource is drowning.
//!
//! The load observations are smoothed with an exponential moving average
//! (`EMA_ALPHA` per observation) so a single spiky sample does not whipsaw
//! every client's rate.

use super::{Decision, elapsed, reset_timestamp, retry_horizon};
use crate::state::LimiterState;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// EMA coefficient applied to each new load observation
const EMA_ALPHA: f64 = 0.3;

/// Smoothed system-load signal shared between observers and checks
///
/// Cloning is cheap and clones share the same signal. Reads on the check
/// path are lock-free snapshot loads; `observe` folds a new sample into the
/// moving average.
#[derive(Debug, Clone)]
pub struct LoadSignal {
    ema: Arc<ArcSwap<f64>>,
}

impl LoadSignal {
    /// Create a signal starting at zero load
    pub fn new() -> Self {
        Self {
            ema: Arc::new(ArcSwap::from_pointee(0.0)),
        }
    }

    /// Fold a load sample in `[0, 1]` into the moving average
    ///
    /// Out-of-range samples are clamped rather than rejected; the signal is
    /// advisory and must never fail a check.
    pub fn observe(&self, sample: f64) {
        let sample = if sample.is_finite() {
            sample.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.ema
            .rcu(|current| EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * **current);
    }

    /// Current smoothed load in `[0, 1]`
    pub fn value(&self) -> f64 {
        **self.ema.load()
    }
}

impl Default for LoadSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Refill rate for the given smoothed load
fn effective_rate(min_rate: f64, max_rate: f64, load: f64) -> f64 {
    min_rate + (1.0 - load.clamp(0.0, 1.0)) * (max_rate - min_rate)
}

pub(super) fn decide(
    state: Option<&LimiterState>,
    capacity: u64,
    min_rate: f64,
    max_rate: f64,
    load: f64,
    cost: u64,
    now: f64,
) -> (LimiterState, Decision) {
    let rate = effective_rate(min_rate, max_rate, load);

    let (tokens, last_refill) = match state {
        Some(LimiterState::Adaptive {
            tokens,
            last_refill,
        }) => (*tokens, *last_refill),
        _ => (capacity as f64, now),
    };

    let cap = capacity as f64;
    let refilled = (tokens + elapsed(now, last_refill) * rate).min(cap);

    let (tokens, decision) = if refilled >= cost as f64 {
        let left = refilled - cost as f64;
        (
            left,
            Decision::allowed(
                left as u64,
                capacity,
                reset_timestamp(now, (cap - left) / rate),
            ),
        )
    } else {
        (
            refilled,
            Decision::denied(
                refilled as u64,
                capacity,
                reset_timestamp(now, (cap - refilled) / rate),
                retry_horizon((cost as f64 - refilled) / rate),
            ),
        )
    };

    (
        LimiterState::Adaptive {
            tokens,
            last_refill: now,
        },
        decision,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: f64 = 1_700_000_000.0;

    #[test]
    fn test_effective_rate_interpolation() {
        assert_eq!(effective_rate(1.0, 11.0, 0.0), 11.0);
        assert_eq!(effective_rate(1.0, 11.0, 1.0), 1.0);
        assert_eq!(effective_rate(1.0, 11.0, 0.5), 6.0);
    }

    #[test]
    fn test_idle_system_refills_at_max_rate() {
        let drained = LimiterState::Adaptive {
            tokens: 0.0,
            last_refill: NOW,
        };
        // load 0 => rate 10/s => 5 tokens after 0.5s.
        let (_, decision) = decide(Some(&drained), 10, 1.0, 10.0, 0.0, 5, NOW + 0.5);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_loaded_system_refills_at_min_rate() {
        let drained = LimiterState::Adaptive {
            tokens: 0.0,
            last_refill: NOW,
        };
        // load 1 => rate 1/s => only 0.5 tokens after 0.5s.
        let (_, decision) = decide(Some(&drained), 10, 1.0, 10.0, 1.0, 1, NOW + 0.5);
        assert!(!decision.allowed);
    }

    #[test]
    fn test_load_signal_ema_smoothing() {
        let signal = LoadSignal::new();
        assert_eq!(signal.value(), 0.0);

        signal.observe(1.0);
        assert!((signal.value() - 0.3).abs() < 1e-9);

        signal.observe(1.0);
        assert!((signal.value() - 0.51).abs() < 1e-9);
    }

    #[test]
    fn test_load_signal_clamps_samples() {
        let signal = LoadSignal::new();
        signal.observe(50.0);
        assert!(signal.value() <= 1.0);

        let signal = LoadSignal::new();
        signal.observe(-3.0);
        assert_eq!(signal.value(), 0.0);

        let signal = LoadSignal::new();
        signal.observe(f64::NAN);
        assert!((signal.value() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_shared_signal_between_clones() {
        let signal = LoadSignal::new();
        let clone = signal.clone();
        signal.observe(1.0);
        assert_eq!(signal.value(), clone.value());
    }
}
