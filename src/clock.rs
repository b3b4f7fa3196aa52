//! Wall-clock sampling for window and refill arithmetic
//!
//! All algorithm state is timestamped with Unix seconds rather than process
//! `Instant`s so that state written by one node can be read by another.

use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Current wall-clock time as fractional Unix seconds
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Elapsed seconds between a stored timestamp and now, clamped at zero
///
/// A clock that moved backwards (NTP step, VM migration) would otherwise
/// produce a negative refill. The anomaly is logged and treated as zero
/// elapsed time; it is never an error.
pub fn elapsed(now: f64, last: f64) -> f64 {
    let dt = now - last;
    if dt < 0.0 {
        warn!(
            now = now,
            last = last,
            "clock moved backwards; clamping elapsed time to zero"
        );
        0.0
    } else {
        dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_now_is_positive() {
        assert!(unix_now() > 0.0);
    }

    #[test]
    fn test_elapsed_forward() {
        assert_eq!(elapsed(100.5, 99.0), 1.5);
        assert_eq!(elapsed(100.0, 100.0), 0.0);
    }

    #[test]
    fn test_elapsed_clamps_backwards_clock() {
        assert_eq!(elapsed(99.0, 100.0), 0.0);
    }
}
