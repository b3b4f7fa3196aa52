//! Leaky Bucket Algorithm
//!
//! The bucket level rises by the cost of each admitted request and drains at
//! `leak_rate` per second, floored at zero. A request is admitted only if the
//! level plus its cost fits under the capacity, so downstream throughput
//! stays at the leak rate no matter how bursty the input is.

use super::{Decision, elapsed, reset_timestamp, retry_horizon};
use crate::state::LimiterState;

pub(super) fn decide(
    state: Option<&LimiterState>,
    capacity: u64,
    leak_rate: f64,
    cost: u64,
    now: f64,
) -> (LimiterState, Decision) {
    let (level, last_leak) = match state {
        Some(LimiterState::LeakyBucket { level, last_leak }) => (*level, *last_leak),
        _ => (0.0, now),
    };

    let cap = capacity as f64;
    let drained = (level - elapsed(now, last_leak) * leak_rate).max(0.0);

    let (level, decision) = if drained + cost as f64 <= cap {
        let level = drained + cost as f64;
        (
            level,
            Decision::allowed(
                (cap - level) as u64,
                capacity,
                reset_timestamp(now, level / leak_rate),
            ),
        )
    } else {
        let overflow = drained + cost as f64 - cap;
        (
            drained,
            Decision::denied(
                (cap - drained) as u64,
                capacity,
                reset_timestamp(now, drained / leak_rate),
                retry_horizon(overflow / leak_rate),
            ),
        )
    };

    (
        LimiterState::LeakyBucket {
            level,
            last_leak: now,
        },
        decision,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const NOW: f64 = 1_700_000_000.0;

    #[test]
    fn test_fill_to_capacity_then_deny() {
        let mut state = None;
        for _ in 0..5 {
            let (next, decision) = decide(state.as_ref(), 5, 1.0, 1, NOW);
            assert!(decision.allowed);
            state = Some(next);
        }

        let (next, decision) = decide(state.as_ref(), 5, 1.0, 1, NOW);
        assert!(!decision.allowed);
        // One unit has to leak before a cost-1 request fits.
        assert_eq!(decision.retry_after, Some(Duration::from_secs(1)));
        match next {
            LimiterState::LeakyBucket { level, .. } => assert_eq!(level, 5.0),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_level_drains_over_time() {
        let state = LimiterState::LeakyBucket {
            level: 5.0,
            last_leak: NOW,
        };
        // After 3s at leak_rate=1, three units have drained.
        let (next, decision) = decide(Some(&state), 5, 1.0, 1, NOW + 3.0);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        match next {
            LimiterState::LeakyBucket { level, .. } => assert_eq!(level, 3.0),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_level_floors_at_zero() {
        let state = LimiterState::LeakyBucket {
            level: 2.0,
            last_leak: NOW,
        };
        let (next, _) = decide(Some(&state), 5, 1.0, 1, NOW + 1000.0);
        match next {
            LimiterState::LeakyBucket { level, .. } => assert_eq!(level, 1.0),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_level_never_exceeds_capacity() {
        let mut state = None;
        for _ in 0..20 {
            let (next, _) = decide(state.as_ref(), 5, 0.5, 1, NOW);
            match &next {
                LimiterState::LeakyBucket { level, .. } => assert!(*level <= 5.0),
                other => panic!("unexpected state: {:?}", other),
            }
            state = Some(next);
        }
    }

    #[test]
    fn test_vanishing_leak_rate_clamps_retry() {
        let (state, _) = decide(None, 1, 1e-300, 1, NOW);
        let (_, decision) = decide(Some(&state), 1, 1e-300, 1, NOW);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(Duration::MAX));
    }

    #[test]
    fn test_weighted_cost() {
        let (state, decision) = decide(None, 10, 2.0, 7, NOW);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 3);

        // cost 4 does not fit over level 7; one unit must leak first.
        let (_, decision) = decide(Some(&state), 10, 2.0, 4, NOW);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(Duration::from_secs_f64(0.5)));
    }
}
