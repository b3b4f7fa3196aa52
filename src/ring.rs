//! Consistent-hash routing
//!
//! Maps client keys to owning store nodes so state can be partitioned
//! horizontally without a central coordinator. Each node contributes
//! `virtual_nodes` positions on a ring of `u64` hash values; a key is owned
//! by the first position at or after its own hash, wrapping around. Adding
//! or removing a node remaps only roughly `1/n` of the keys.
//!
//! Positions come from SHA-256, truncated to the first eight bytes, so every
//! process routes identically. A process-seeded hasher would send the same
//! key to different shards on different nodes.
//!
//! Lookups are read-heavy and topology changes are rare, so the ring is an
//! immutable snapshot behind `ArcSwap`: routing never takes a lock, and a
//! reconfiguration builds a new snapshot and swaps it in.

use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Default number of virtual nodes per physical node
pub const DEFAULT_VIRTUAL_NODES: u32 = 100;

#[derive(Debug, Default)]
struct RingSnapshot {
    nodes: BTreeSet<String>,
    /// `(position, node_id)` sorted by position
    positions: Vec<(u64, String)>,
}

impl RingSnapshot {
    fn build(nodes: BTreeSet<String>, virtual_nodes: u32) -> Self {
        let mut positions = Vec::with_capacity(nodes.len() * virtual_nodes as usize);
        for node in &nodes {
            for index in 0..virtual_nodes {
                positions.push((hash_position(&format!("{}#{}", node, index)), node.clone()));
            }
        }
        positions.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        Self { nodes, positions }
    }
}

/// Consistent-hash ring over store node identifiers
///
/// The ring owns no limiter state; it only answers routing lookups.
pub struct HashRing {
    snapshot: ArcSwap<RingSnapshot>,
    virtual_nodes: u32,
}

impl HashRing {
    /// Create an empty ring with the default virtual-node count
    pub fn new() -> Self {
        Self::with_virtual_nodes(DEFAULT_VIRTUAL_NODES)
    }

    /// Create an empty ring with a custom virtual-node count
    pub fn with_virtual_nodes(virtual_nodes: u32) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RingSnapshot::default()),
            virtual_nodes: virtual_nodes.max(1),
        }
    }

    /// Build a ring from an initial node set
    pub fn with_nodes<I, S>(nodes: I, virtual_nodes: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ring = Self::with_virtual_nodes(virtual_nodes);
        let nodes: BTreeSet<String> = nodes.into_iter().map(Into::into).collect();
        ring.snapshot
            .store(Arc::new(RingSnapshot::build(nodes, ring.virtual_nodes)));
        ring
    }

    /// Add a node, rebuilding and swapping the snapshot
    pub fn add_node(&self, node_id: impl Into<String>) {
        let node_id = node_id.into();
        debug!(node = %node_id, "adding node to hash ring");
        self.snapshot.rcu(|current| {
            let mut nodes = current.nodes.clone();
            nodes.insert(node_id.clone());
            RingSnapshot::build(nodes, self.virtual_nodes)
        });
    }

    /// Remove a node, rebuilding and swapping the snapshot
    pub fn remove_node(&self, node_id: &str) {
        debug!(node = %node_id, "removing node from hash ring");
        self.snapshot.rcu(|current| {
            let mut nodes = current.nodes.clone();
            nodes.remove(node_id);
            RingSnapshot::build(nodes, self.virtual_nodes)
        });
    }

    /// Node owning `key`, or `None` if the ring is empty
    pub fn route(&self, key: &str) -> Option<String> {
        let snapshot = self.snapshot.load();
        if snapshot.positions.is_empty() {
            return None;
        }

        let hash = hash_position(key);
        let index = snapshot.positions.partition_point(|(pos, _)| *pos < hash);
        let (_, node) = snapshot
            .positions
            .get(index)
            .unwrap_or_else(|| &snapshot.positions[0]);
        Some(node.clone())
    }

    /// Number of physical nodes on the ring
    pub fn node_count(&self) -> usize {
        self.snapshot.load().nodes.len()
    }

    /// Whether the ring has no nodes
    pub fn is_empty(&self) -> bool {
        self.node_count() == 0
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashRing")
            .field("nodes", &self.node_count())
            .field("virtual_nodes", &self.virtual_nodes)
            .finish()
    }
}

/// Ring position for an identifier: first eight bytes of its SHA-256
fn hash_position(data: &str) -> u64 {
    let digest = Sha256::digest(data.as_bytes());
    u64::from_be_bytes(digest[0..8].try_into().unwrap_or_default())
}
