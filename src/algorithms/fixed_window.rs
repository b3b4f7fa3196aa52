//! Fixed Window Algorithm
//!
//! Time is divided into windows identified by `floor(now / window)`; each
//! window admits up to `capacity` requests and the counter resets when the
//! identifier changes. The identifier is derived from the wall clock on every
//! check, so independent nodes agree on window boundaries without
//! coordination.
//!
//! Known trade-off, kept deliberately: a burst just before a boundary plus a
//! burst just after it admits up to twice the capacity in a near-instant.
//! Callers needing a strict bound should use the sliding log or sliding
//! counter algorithm.

use super::{Decision, reset_timestamp, retry_horizon};
use crate::state::LimiterState;

pub(super) fn decide(
    state: Option<&LimiterState>,
    capacity: u64,
    window_secs: f64,
    cost: u64,
    now: f64,
) -> (LimiterState, Decision) {
    let current_id = (now / window_secs).floor() as u64;

    let count = match state {
        Some(LimiterState::FixedWindow { window_id, count }) if *window_id == current_id => *count,
        _ => 0,
    };

    let window_end = (current_id + 1) as f64 * window_secs;
    let reset_at = reset_timestamp(now, window_end - now);

    let (count, decision) = if count + cost <= capacity {
        let count = count + cost;
        (
            count,
            Decision::allowed(capacity - count, capacity, reset_at),
        )
    } else {
        (
            count,
            // Saturating: stale state may hold a count above a freshly
            // shrunk capacity.
            Decision::denied(
                capacity.saturating_sub(count),
                capacity,
                reset_at,
                retry_horizon(window_end - now),
            ),
        )
    };

    (
        LimiterState::FixedWindow {
            window_id: current_id,
            count,
        },
        decision,
    )
}
