//! Tier and policy resolution
//!
//! Maps `(client, resource)` to the policy that governs it: a per-client
//! per-resource override wins, then a per-client override, then the default
//! policy of the client's tier, then the global default. Resolution is pure
//! lookup over an immutable snapshot behind `ArcSwap`; nothing in the hot
//! path fetches configuration over the network. Installing a new snapshot is
//! the explicit policy-change event that invalidates the old one.

use crate::error::{RateLimitError, RateLimitResult};
use crate::policy::Policy;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One immutable policy configuration snapshot
#[derive(Debug, Default)]
pub struct PolicySet {
    policies: HashMap<String, Arc<Policy>>,
    /// `(client, resource)` overrides
    resource_overrides: HashMap<(String, String), String>,
    /// Per-client overrides
    client_overrides: HashMap<String, String>,
    /// Tier name to default policy id
    tier_defaults: HashMap<String, String>,
    /// Client to tier assignment
    client_tiers: HashMap<String, String>,
    /// Fallback policy id when nothing else matches
    default_policy: Option<String>,
}

impl PolicySet {
    /// Start building a snapshot
    pub fn builder() -> PolicySetBuilder {
        PolicySetBuilder::default()
    }

    fn get(&self, policy_id: &str) -> RateLimitResult<Arc<Policy>> {
        self.policies
            .get(policy_id)
            .cloned()
            .ok_or_else(|| RateLimitError::policy_not_found(policy_id))
    }

    fn resolve_id(&self, client_id: &str, resource: &str) -> Option<&String> {
        self.resource_overrides
            .get(&(client_id.to_string(), resource.to_string()))
            .or_else(|| self.client_overrides.get(client_id))
            .or_else(|| {
                let tier = self.client_tiers.get(client_id)?;
                self.tier_defaults.get(tier)
            })
            .or(self.default_policy.as_ref())
    }
}

/// Builder for a [`PolicySet`] snapshot
#[derive(Debug, Default)]
pub struct PolicySetBuilder {
    set: PolicySet,
}

impl PolicySetBuilder {
    /// Register a policy
    pub fn policy(mut self, policy: Policy) -> Self {
        let tier = policy.tier.clone();
        let id = policy.id.clone();
        self.set.policies.insert(id.clone(), Arc::new(policy));
        // The first policy registered for a tier becomes its default.
        self.set.tier_defaults.entry(tier).or_insert(id);
        self
    }

    /// Set a tier's default policy explicitly
    pub fn tier_default(mut self, tier: impl Into<String>, policy_id: impl Into<String>) -> Self {
        self.set.tier_defaults.insert(tier.into(), policy_id.into());
        self
    }

    /// Assign a client to a tier
    pub fn client_tier(mut self, client_id: impl Into<String>, tier: impl Into<String>) -> Self {
        self.set.client_tiers.insert(client_id.into(), tier.into());
        self
    }

    /// Override the policy for one client
    pub fn client_override(
        mut self,
        client_id: impl Into<String>,
        policy_id: impl Into<String>,
    ) -> Self {
        self.set
            .client_overrides
            .insert(client_id.into(), policy_id.into());
        self
    }

    /// Override the policy for one client on one resource
    pub fn resource_override(
        mut self,
        client_id: impl Into<String>,
        resource: impl Into<String>,
        policy_id: impl Into<String>,
    ) -> Self {
        self.set
            .resource_overrides
            .insert((client_id.into(), resource.into()), policy_id.into());
        self
    }

    /// Set the global fallback policy
    pub fn default_policy(mut self, policy_id: impl Into<String>) -> Self {
        self.set.default_policy = Some(policy_id.into());
        self
    }

    /// Finish, verifying every referenced policy id exists
    pub fn build(self) -> RateLimitResult<PolicySet> {
        let set = self.set;
        let referenced = set
            .resource_overrides
            .values()
            .chain(set.client_overrides.values())
            .chain(set.tier_defaults.values())
            .chain(set.default_policy.iter());
        for policy_id in referenced {
            if !set.policies.contains_key(policy_id) {
                return Err(RateLimitError::config(format!(
                    "mapping references unknown policy {}",
                    policy_id
                )));
            }
        }
        Ok(set)
    }
}

/// Snapshot-swapped policy registry
pub struct TierManager {
    set: ArcSwap<PolicySet>,
}

impl TierManager {
    /// Create a manager over an initial snapshot
    pub fn new(set: PolicySet) -> Self {
        Self {
            set: ArcSwap::from_pointee(set),
        }
    }

    /// Look up a policy by id
    pub fn policy(&self, policy_id: &str) -> RateLimitResult<Arc<Policy>> {
        self.set.load().get(policy_id)
    }

    /// Resolve the policy governing `(client, resource)`
    pub fn resolve(&self, client_id: &str, resource: &str) -> RateLimitResult<Arc<Policy>> {
        let set = self.set.load();
        match set.resolve_id(client_id, resource) {
            Some(policy_id) => set.get(policy_id),
            None => Err(RateLimitError::policy_not_found(format!(
                "no policy for client {} on {}",
                client_id, resource
            ))),
        }
    }

    /// Install a new snapshot, replacing the old one atomically
    ///
    /// This is the policy-change event; in-flight resolutions finish against
    /// the snapshot they loaded.
    pub fn install(&self, set: PolicySet) {
        debug!(policies = set.policies.len(), "installing policy snapshot");
        self.set.store(Arc::new(set));
    }
}

impl std::fmt::Debug for TierManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierManager")
            .field("policies", &self.set.load().policies.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Algorithm;

    fn policy(id: &str, tier: &str, capacity: u64) -> Policy {
        Policy::new(
            id,
            Algorithm::TokenBucket {
                capacity,
                refill_rate: 1.0,
            },
        )
        .unwrap()
        .with_tier(tier)
    }

    fn sample_set() -> PolicySet {
        PolicySet::builder()
            .policy(policy("free-default", "free", 10))
            .policy(policy("premium-default", "premium", 100))
            .policy(policy("search-special", "premium", 50))
            .policy(Policy::bypass("internal-bypass"))
            .client_tier("alice", "premium")
            .client_tier("bob", "free")
            .client_override("carol", "premium-default")
            .resource_override("alice", "/search", "search-special")
            .client_override("svc-batch", "internal-bypass")
            .default_policy("free-default")
            .build()
            .unwrap()
    }

    #[test]
    fn test_policy_lookup() {
        let manager = TierManager::new(sample_set());
        assert_eq!(manager.policy("free-default").unwrap().capacity(), 10);
        assert!(matches!(
            manager.policy("nope"),
            Err(RateLimitError::PolicyNotFound(_))
        ));
    }

    #[test]
    fn test_tier_default_resolution() {
        let manager = TierManager::new(sample_set());
        assert_eq!(manager.resolve("alice", "/api").unwrap().id, "premium-default");
        assert_eq!(manager.resolve("bob", "/api").unwrap().id, "free-default");
    }

    #[test]
    fn test_resource_override_wins() {
        let manager = TierManager::new(sample_set());
        assert_eq!(
            manager.resolve("alice", "/search").unwrap().id,
            "search-special"
        );
    }

    #[test]
    fn test_client_override_beats_tier() {
        let manager = TierManager::new(sample_set());
        assert_eq!(
            manager.resolve("carol", "/api").unwrap().id,
            "premium-default"
        );
    }

    #[test]
    fn test_unknown_client_falls_back_to_default() {
        let manager = TierManager::new(sample_set());
        assert_eq!(manager.resolve("mallory", "/api").unwrap().id, "free-default");
    }

    #[test]
    fn test_bypass_resolves_through_override() {
        let manager = TierManager::new(sample_set());
        assert!(manager.resolve("svc-batch", "/api").unwrap().bypass);
    }

    #[test]
    fn test_builder_rejects_dangling_reference() {
        let result = PolicySet::builder()
            .policy(policy("a", "free", 10))
            .client_override("x", "missing")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_install_swaps_snapshot() {
        let manager = TierManager::new(sample_set());
        assert!(manager.policy("free-default").is_ok());

        let next = PolicySet::builder()
            .policy(policy("v2-only", "free", 5))
            .build()
            .unwrap();
        manager.install(next);

        assert!(manager.policy("free-default").is_err());
        assert!(manager.policy("v2-only").is_ok());
    }
}
