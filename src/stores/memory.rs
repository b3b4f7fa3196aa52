//! In-memory state store
//!
//! Uses DashMap for thread-safe concurrent access; holding a key's entry
//! guard for the duration of the transition is what makes the
//! read-modify-write indivisible. Suitable for single-instance deployments
//! and tests; state is not shared across processes.

use crate::algorithms::Decision;
use crate::clock;
use crate::error::RateLimitResult;
use crate::state::LimiterState;
use crate::stores::{StateStore, Transition};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct Entry {
    state: LimiterState,
    expires_at: f64,
}

/// In-memory rate limit state store
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        debug!("creating in-memory rate limit store");
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of tracked keys (for monitoring)
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn apply(
        &self,
        key: &str,
        ttl: Duration,
        transition: Transition<'_>,
    ) -> RateLimitResult<Decision> {
        let now = clock::unix_now();
        let expires_at = now + ttl.as_secs_f64();

        // The entry guard is a per-key lock; the transition runs inside it.
        let decision = match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let current = (occupied.get().expires_at > now).then(|| occupied.get().state.clone());
                let (state, decision) = transition(current.as_ref());
                occupied.insert(Entry { state, expires_at });
                decision
            }
            MapEntry::Vacant(vacant) => {
                let (state, decision) = transition(None);
                vacant.insert(Entry { state, expires_at });
                decision
            }
        };

        trace!(key = %key, allowed = decision.allowed, "memory store transition");
        Ok(decision)
    }

    async fn reset(&self, key: &str) -> RateLimitResult<()> {
        debug!(key = %key, "resetting rate limit state");
        self.entries.remove(key);
        Ok(())
    }

    async fn sweep(&self) -> RateLimitResult<()> {
        let now = clock::unix_now();
        self.entries.retain(|_, entry| entry.expires_at > now);
        debug!(key_count = self.key_count(), "swept expired state");
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.key_count())
            .finish()
    }
}
