//! Token Bucket Algorithm
//!
//! The bucket starts full with `capacity` tokens. Tokens are added at
//! `refill_rate` per second, capped at the capacity, and each request
//! consumes its cost. Bursts up to the full capacity pass; sustained traffic
//! is held to the refill rate.

use super::{Decision, elapsed, reset_timestamp, retry_horizon};
use crate::state::LimiterState;
use std::time::Duration;

pub(super) fn decide(
    state: Option<&LimiterState>,
    capacity: u64,
    refill_rate: f64,
    cost: u64,
    now: f64,
) -> (LimiterState, Decision) {
    let (tokens, last_refill) = match state {
        Some(LimiterState::TokenBucket {
            tokens,
            last_refill,
        }) => (*tokens, *last_refill),
        _ => (capacity as f64, now),
    };

    let cap = capacity as f64;
    let refilled = (tokens + elapsed(now, last_refill) * refill_rate).min(cap);

    let (tokens, decision) = if refilled >= cost as f64 {
        let left = refilled - cost as f64;
        (
            left,
            Decision::allowed(left as u64, capacity, full_at(now, left, cap, refill_rate)),
        )
    } else {
        // Denied checks still persist the refill, so the timestamp advances
        // without ever granting more than elapsed * rate.
        let retry_after = if refill_rate > 0.0 {
            retry_horizon((cost as f64 - refilled) / refill_rate)
        } else {
            // Never refills; the quota is spent for good.
            Duration::MAX
        };
        (
            refilled,
            Decision::denied(
                refilled as u64,
                capacity,
                full_at(now, refilled, cap, refill_rate),
                retry_after,
            ),
        )
    };

    (
        LimiterState::TokenBucket {
            tokens,
            last_refill: now,
        },
        decision,
    )
}

fn full_at(now: f64, tokens: f64, capacity: f64, refill_rate: f64) -> u64 {
    if refill_rate > 0.0 {
        reset_timestamp(now, (capacity - tokens) / refill_rate)
    } else {
        reset_timestamp(now, 0.0)
    }
}
