//! Error types for rate limiting

use std::time::Duration;
use thiserror::Error;

/// Result type for rate limiting operations
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Rate limiting errors
///
/// Store-side failures (`StoreUnavailable`, `ConflictExhausted`) are recovered
/// by the decision engine into a fail-open or fail-closed verdict and never
/// reach callers during normal operation. `PolicyNotFound` and `InvalidCost`
/// are caller errors and are surfaced as-is.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Unknown policy identifier
    #[error("unknown rate limit policy: {0}")]
    PolicyNotFound(String),

    /// Request cost is zero or exceeds the policy capacity
    #[error("invalid cost {cost} for policy {policy} (capacity {capacity})")]
    InvalidCost {
        /// Policy the check was made against
        policy: String,
        /// Requested cost
        cost: u64,
        /// Policy capacity
        capacity: u64,
    },

    /// Shared state store unreachable or timed out
    #[error("rate limit store unavailable: {0}")]
    StoreUnavailable(String),

    /// Optimistic-update retry budget exceeded
    #[error("optimistic update conflict for {key}: gave up after {attempts} attempts")]
    ConflictExhausted {
        /// State key that kept conflicting
        key: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// Configuration error
    #[error("rate limit configuration error: {0}")]
    Config(String),

    /// Redis connection error
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl RateLimitError {
    /// Create a new store-unavailable error
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a policy-not-found error
    pub fn policy_not_found<S: Into<String>>(policy_id: S) -> Self {
        Self::PolicyNotFound(policy_id.into())
    }

    /// Whether the engine may recover this error into a degraded verdict
    ///
    /// True for store failures and exhausted retry budgets; false for caller
    /// errors like an unknown policy or an invalid cost.
    pub fn is_degradable(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) | Self::ConflictExhausted { .. } => true,
            #[cfg(feature = "redis")]
            Self::Redis(_) => true,
            _ => false,
        }
    }
}

/// Standard rate limit headers
#[derive(Debug, Clone)]
pub struct RateLimitHeaders {
    /// X-RateLimit-Limit: Maximum requests allowed
    pub limit: u64,
    /// X-RateLimit-Remaining: Requests remaining in current window
    pub remaining: u64,
    /// X-RateLimit-Reset: Unix timestamp when the limit resets
    pub reset: u64,
    /// Retry-After: Seconds until the client should retry (only when limited)
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    /// Create headers for an allowed request
    pub fn allowed(limit: u64, remaining: u64, reset: u64) -> Self {
        Self {
            limit,
            remaining,
            reset,
            retry_after: None,
        }
    }

    /// Create headers for a denied request
    pub fn denied(limit: u64, reset: u64, retry_after: u64) -> Self {
        Self {
            limit,
            remaining: 0,
            reset,
            retry_after: Some(retry_after),
        }
    }

    /// Get header name/value pairs
    pub fn to_header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset.to_string()),
        ];

        if let Some(retry) = self.retry_after {
            headers.push(("Retry-After", retry.to_string()));
        }

        headers
    }
}

/// Seconds until retry, rounded up so clients never retry early
pub(crate) fn retry_after_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs_f64().ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradable_errors() {
        assert!(RateLimitError::store("timeout").is_degradable());
        assert!(
            RateLimitError::ConflictExhausted {
                key: "k".to_string(),
                attempts: 5,
            }
            .is_degradable()
        );
        assert!(!RateLimitError::policy_not_found("p").is_degradable());
        assert!(
            !RateLimitError::InvalidCost {
                policy: "p".to_string(),
                cost: 0,
                capacity: 10,
            }
            .is_degradable()
        );
        assert!(!RateLimitError::config("bad").is_degradable());
    }

    #[test]
    fn test_error_display() {
        let err = RateLimitError::policy_not_found("premium-read");
        assert!(err.to_string().contains("premium-read"));

        let err = RateLimitError::ConflictExhausted {
            key: "api:abc".to_string(),
            attempts: 5,
        };
        assert!(err.to_string().contains("5 attempts"));
    }

    #[test]
    fn test_headers_to_pairs() {
        let headers = RateLimitHeaders::denied(100, 1234567890, 30);
        let pairs = headers.to_header_pairs();

        assert_eq!(pairs.len(), 4);
        assert!(
            pairs
                .iter()
                .any(|(k, v)| *k == "X-RateLimit-Limit" && v == "100")
        );
        assert!(
            pairs
                .iter()
                .any(|(k, v)| *k == "X-RateLimit-Remaining" && v == "0")
        );
        assert!(pairs.iter().any(|(k, v)| *k == "Retry-After" && v == "30"));
    }

    #[test]
    fn test_allowed_headers_omit_retry() {
        let headers = RateLimitHeaders::allowed(100, 42, 1234567890);
        let pairs = headers.to_header_pairs();
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|(k, _)| *k != "Retry-After"));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(2)), 2);
        assert_eq!(retry_after_secs(Duration::from_millis(2500)), 3);
    }
}
