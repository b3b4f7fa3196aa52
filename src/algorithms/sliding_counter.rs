//! Sliding Window Counter Algorithm
//!
//! Divides the window into `sub_windows` equal slices and keeps one count
//! per slice. The admitted total over the sliding window is estimated by
//! summing the slices that overlap it, with the oldest partially-overlapping
//! slice weighted by its overlap fraction. Approximates the log algorithm
//! with O(sub_windows) state instead of O(capacity).
//!
//! Slice identifiers come from dividing the wall clock by the slice length,
//! never from a stored pointer, so nodes agree on slice boundaries.

use super::{Decision, reset_timestamp, retry_horizon};
use crate::state::LimiterState;

pub(super) fn decide(
    state: Option<&LimiterState>,
    capacity: u64,
    window_secs: f64,
    sub_windows: u32,
    cost: u64,
    now: f64,
) -> (LimiterState, Decision) {
    let n = sub_windows as u64;
    let slice_secs = window_secs / sub_windows as f64;
    let current_id = (now / slice_secs).floor() as u64;
    // Fraction of the current slice already elapsed; the slice that drops
    // out of the window keeps the complementary weight.
    let frac = (now / slice_secs) - current_id as f64;

    let mut buckets = match state {
        Some(LimiterState::SlidingCounter { buckets }) => buckets.clone(),
        _ => Vec::new(),
    };
    buckets.retain(|(id, _)| id + n >= current_id && *id <= current_id);

    let mut weighted = 0.0;
    for (id, count) in &buckets {
        if id + n == current_id {
            weighted += *count as f64 * (1.0 - frac);
        } else {
            weighted += *count as f64;
        }
    }

    let reset_at = reset_timestamp(now, window_secs);
    let remaining = (capacity as f64 - weighted).max(0.0) as u64;

    let decision = if weighted + cost as f64 <= capacity as f64 {
        match buckets.iter_mut().find(|(id, _)| *id == current_id) {
            Some((_, count)) => *count += cost,
            None => buckets.push((current_id, cost)),
        }
        Decision::allowed(remaining - cost.min(remaining), capacity, reset_at)
    } else {
        // The estimate only decreases as the oldest slice slides out, so
        // the next chance is the next slice boundary.
        let retry_after = retry_horizon((1.0 - frac) * slice_secs);
        Decision::denied(remaining, capacity, reset_at, retry_after)
    };

    (LimiterState::SlidingCounter { buckets }, decision)
}
