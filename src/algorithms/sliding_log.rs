//! Sliding Window Log Algorithm
//!
//! Keeps the timestamp of every admitted request. On each check, entries
//! older than `now - window` are pruned, the request is admitted if the
//! remaining log still has room for its cost, and admitted costs append
//! their timestamps. Exact at any instant, at O(capacity) state per key; the
//! pruning on every access is also what bounds the log length.

use super::{Decision, reset_timestamp, retry_horizon};
use crate::state::LimiterState;
use std::collections::VecDeque;
use std::time::Duration;

pub(super) fn decide(
    state: Option<&LimiterState>,
    capacity: u64,
    window_secs: f64,
    cost: u64,
    now: f64,
) -> (LimiterState, Decision) {
    let mut timestamps = match state {
        Some(LimiterState::SlidingLog { timestamps }) => timestamps.clone(),
        _ => VecDeque::new(),
    };

    let cutoff = now - window_secs;
    while timestamps.front().is_some_and(|t| *t <= cutoff) {
        timestamps.pop_front();
    }

    let in_window = timestamps.len() as u64;
    let reset_at = match timestamps.front() {
        Some(oldest) => reset_timestamp(now, oldest + window_secs - now),
        None => reset_timestamp(now, 0.0),
    };

    let decision = if in_window + cost <= capacity {
        for _ in 0..cost {
            timestamps.push_back(now);
        }
        Decision::allowed(capacity - in_window - cost, capacity, reset_at)
    } else {
        // The request fits once `in_window + cost - capacity` entries have
        // aged out; that many oldest entries set the retry horizon.
        let must_expire = (in_window + cost - capacity) as usize;
        let retry_after = timestamps
            .get(must_expire - 1)
            .map(|t| retry_horizon(t + window_secs - now))
            .unwrap_or(Duration::ZERO);
        // Saturating: stale state may hold more entries than a freshly
        // shrunk capacity.
        Decision::denied(capacity.saturating_sub(in_window), capacity, reset_at, retry_after)
    };

    (LimiterState::SlidingLog { timestamps }, decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: f64 = 1_700_000_000.0;

    #[test]
    fn test_admit_up_to_capacity() {
        let mut state = None;
        for i in (0..5).rev() {
            let (next, decision) = decide(state.as_ref(), 5, 1.0, 1, NOW);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, i);
            state = Some(next);
        }

        let (_, decision) = decide(state.as_ref(), 5, 1.0, 1, NOW);
        assert!(!decision.allowed);
    }

    #[test]
    fn test_entries_age_out() {
        let (state, _) = decide(None, 2, 1.0, 2, NOW);
        let (_, decision) = decide(Some(&state), 2, 1.0, 1, NOW + 0.5);
        assert!(!decision.allowed);

        // Just past the window the old entries are gone.
        let (state, decision) = decide(Some(&state), 2, 1.0, 1, NOW + 1.001);
        assert!(decision.allowed);
        match state {
            LimiterState::SlidingLog { timestamps } => assert_eq!(timestamps.len(), 1),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_no_sliding_interval_exceeds_capacity() {
        // Requests at arbitrary spacing: any 1-second interval admits at
        // most 5, checked against the admitted timestamp log itself.
        let offsets = [
            0.0, 0.05, 0.1, 0.2, 0.21, 0.4, 0.55, 0.7, 0.9, 0.95, 1.0, 1.05, 1.1, 1.3, 1.6, 1.9,
            2.0, 2.02, 2.4, 2.8,
        ];
        let mut state = None;
        let mut admitted: Vec<f64> = Vec::new();

        for dt in offsets {
            let now = NOW + dt;
            let (next, decision) = decide(state.as_ref(), 5, 1.0, 1, now);
            if decision.allowed {
                admitted.push(now);
            }
            state = Some(next);
        }

        for t in &admitted {
            let in_interval = admitted
                .iter()
                .filter(|u| **u > *t - 1.0 && **u <= *t)
                .count();
            assert!(in_interval <= 5, "interval ending at {} holds {}", t, in_interval);
        }
    }

    #[test]
    fn test_log_length_bounded_by_capacity() {
        let mut state = None;
        for i in 0..50 {
            let (next, _) = decide(state.as_ref(), 5, 10.0, 1, NOW + i as f64 * 0.01);
            match &next {
                LimiterState::SlidingLog { timestamps } => assert!(timestamps.len() <= 5),
                other => panic!("unexpected state: {:?}", other),
            }
            state = Some(next);
        }
    }

    #[test]
    fn test_cost_appends_that_many_entries() {
        let (state, decision) = decide(None, 5, 1.0, 3, NOW);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        match &state {
            LimiterState::SlidingLog { timestamps } => assert_eq!(timestamps.len(), 3),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_stale_log_above_shrunk_capacity_saturates() {
        // Ten entries left behind by a larger earlier capacity; with the
        // limit now at 5, remaining floors at zero instead of underflowing.
        let state = LimiterState::SlidingLog {
            timestamps: std::iter::repeat(NOW).take(10).collect(),
        };
        let (_, decision) = decide(Some(&state), 5, 10.0, 1, NOW + 1.0);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_denied_retry_after_waits_for_expiry() {
        let (state, _) = decide(None, 3, 10.0, 3, NOW);
        // cost 2 needs 2 of the 3 entries to expire; all expire at NOW+10.
        let (_, decision) = decide(Some(&state), 3, 10.0, 2, NOW + 4.0);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(Duration::from_secs(6)));
    }
}
