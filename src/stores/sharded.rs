//! Consistent-hash sharded store
//!
//! Partitions client state across several store instances: each key is owned
//! by exactly one shard, chosen by the hash ring, so every check for a given
//! key lands on the same instance and the per-key atomicity of the
//! underlying store carries over. No state is replicated; scaling out is a
//! matter of adding a shard to the ring.

use crate::algorithms::Decision;
use crate::error::{RateLimitError, RateLimitResult};
use crate::ring::HashRing;
use crate::stores::{StateStore, Transition};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// A store routing each key to its owning shard
pub struct ShardedStore {
    ring: HashRing,
    shards: DashMap<String, Arc<dyn StateStore>>,
}

impl ShardedStore {
    /// Create an empty sharded store
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            ring: HashRing::with_virtual_nodes(virtual_nodes),
            shards: DashMap::new(),
        }
    }

    /// Add a shard under a node identifier
    pub fn add_shard(&self, node_id: impl Into<String>, store: Arc<dyn StateStore>) {
        let node_id = node_id.into();
        debug!(node = %node_id, store = store.store_type(), "adding shard");
        self.shards.insert(node_id.clone(), store);
        self.ring.add_node(node_id);
    }

    /// Remove a shard; its keys move to the remaining shards
    ///
    /// State held on the removed shard is abandoned, not migrated. A moved
    /// key starts fresh on its new owner, which briefly under-counts toward
    /// that client; availability is preferred over exactness here.
    pub fn remove_shard(&self, node_id: &str) {
        debug!(node = %node_id, "removing shard");
        self.ring.remove_node(node_id);
        self.shards.remove(node_id);
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.ring.node_count()
    }

    fn shard_for(&self, key: &str) -> RateLimitResult<Arc<dyn StateStore>> {
        let node_id = self
            .ring
            .route(key)
            .ok_or_else(|| RateLimitError::store("no shards configured"))?;
        let shard = self
            .shards
            .get(&node_id)
            .ok_or_else(|| RateLimitError::store(format!("shard {} not registered", node_id)))?;
        Ok(Arc::clone(shard.value()))
    }
}

#[async_trait]
impl StateStore for ShardedStore {
    async fn apply(
        &self,
        key: &str,
        ttl: Duration,
        transition: Transition<'_>,
    ) -> RateLimitResult<Decision> {
        let shard = self.shard_for(key)?;
        trace!(key = %key, shard = shard.store_type(), "routing to shard");
        shard.apply(key, ttl, transition).await
    }

    async fn reset(&self, key: &str) -> RateLimitResult<()> {
        self.shard_for(key)?.reset(key).await
    }

    async fn sweep(&self) -> RateLimitResult<()> {
        // Snapshot the shard handles; the map guard must not be held
        // across an await.
        let shards: Vec<Arc<dyn StateStore>> = self
            .shards
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for shard in shards {
            shard.sweep().await?;
        }
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "sharded"
    }
}

impl std::fmt::Debug for ShardedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStore")
            .field("shards", &self.shard_count())
            .finish()
    }
}
