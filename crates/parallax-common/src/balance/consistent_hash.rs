//! Consistent-hash selection with virtual nodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use md5::{Digest, Md5};
use parallax_proto::RpcRequest;

use super::{trivial_selection, LoadBalancer};
use crate::endpoint::Endpoint;

/// Virtual nodes per physical endpoint.
const VIRTUAL_NODES: usize = 160;

/// Consistent-hash strategy.
///
/// Each endpoint contributes 160 virtual nodes `host:port#VN{i}` to a ring
/// keyed by a 64-bit MD5 digest. A request maps to the first ring entry at
/// or after its own key hash, wrapping to the first entry. Rings are cached
/// per canonical endpoint set and rebuilt only when the set changes.
#[derive(Debug, Default)]
pub struct ConsistentHashBalancer {
    rings: DashMap<String, Arc<BTreeMap<u64, Endpoint>>>,
}

impl ConsistentHashBalancer {
    /// Creates a consistent-hash balancer with an empty ring cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rings: DashMap::new(),
        }
    }

    /// Drops all cached rings.
    pub fn clear_cache(&self) {
        self.rings.clear();
    }

    /// Number of cached rings, for diagnostics.
    #[must_use]
    pub fn cached_rings(&self) -> usize {
        self.rings.len()
    }

    fn ring_for(&self, endpoints: &[Endpoint]) -> Arc<BTreeMap<u64, Endpoint>> {
        let cache_key = canonical_set_key(endpoints);
        if let Some(ring) = self.rings.get(&cache_key) {
            return ring.clone();
        }

        let ring = Arc::new(build_ring(endpoints));
        tracing::debug!(
            endpoints = endpoints.len(),
            virtual_nodes = ring.len(),
            "built consistent-hash ring"
        );
        self.rings.insert(cache_key, ring.clone());
        ring
    }
}

impl LoadBalancer for ConsistentHashBalancer {
    fn name(&self) -> &'static str {
        "consistent_hash"
    }

    fn select<'a>(&self, endpoints: &'a [Endpoint], request: &RpcRequest) -> Option<&'a Endpoint> {
        if let Some(trivial) = trivial_selection(endpoints) {
            return trivial;
        }

        let ring = self.ring_for(endpoints);
        let key_hash = hash64(&request_key(request));

        // Ceiling entry, wrapping to the first entry past the top of the ring.
        let selected = ring
            .range(key_hash..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, endpoint)| endpoint)?;

        endpoints.iter().find(|e| *e == selected)
    }
}

fn build_ring(endpoints: &[Endpoint]) -> BTreeMap<u64, Endpoint> {
    let mut ring = BTreeMap::new();
    for endpoint in endpoints {
        for i in 0..VIRTUAL_NODES {
            let virtual_node = format!("{endpoint}#VN{i}");
            ring.insert(hash64(&virtual_node), endpoint.clone());
        }
    }
    ring
}

/// Canonical cache key: the sorted endpoint list.
fn canonical_set_key(endpoints: &[Endpoint]) -> String {
    let mut sorted: Vec<&Endpoint> = endpoints.iter().collect();
    sorted.sort();
    let parts: Vec<String> = sorted.iter().map(ToString::to_string).collect();
    parts.join(",")
}

/// Request feature key: service identity plus the first parameter.
fn request_key(request: &RpcRequest) -> String {
    let mut key = format!("{}#{}", request.interface, request.method);
    key.push('#');
    key.push_str(&request.version);
    key.push('#');
    key.push_str(&request.group);
    if let Some(first) = request.params.first() {
        key.push('#');
        key.push_str(&first.hash_repr());
    }
    key
}

/// First 8 bytes of the MD5 digest, big-endian.
fn hash64(key: &str) -> u64 {
    let digest = Md5::digest(key.as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

#[cfg(test)]
mod tests {
    use parallax_proto::Value;

    use super::*;

    fn endpoints() -> Vec<Endpoint> {
        vec![
            Endpoint::new("127.0.0.1", 8001),
            Endpoint::new("127.0.0.1", 8002),
            Endpoint::new("127.0.0.1", 8003),
        ]
    }

    fn request_for(user: &str) -> RpcRequest {
        RpcRequest::new("hello", "greet", vec![Value::from(user)])
            .with_group("default")
            .with_version("1.0")
    }

    #[test]
    fn selection_is_deterministic() {
        let balancer = ConsistentHashBalancer::new();
        let endpoints = endpoints();
        let request = request_for("user123");

        let first = balancer.select(&endpoints, &request).unwrap().clone();
        let second = balancer.select(&endpoints, &request).unwrap().clone();
        assert_eq!(first, second);
    }

    #[test]
    fn removing_an_unused_endpoint_keeps_the_choice() {
        let balancer = ConsistentHashBalancer::new();
        let endpoints = endpoints();
        let request = request_for("user123");

        let chosen = balancer.select(&endpoints, &request).unwrap().clone();
        let reduced: Vec<Endpoint> = endpoints
            .iter()
            .filter(|e| **e == chosen || e.port == if chosen.port == 8001 { 8002 } else { 8001 })
            .cloned()
            .collect();

        let rechosen = balancer.select(&reduced, &request).unwrap().clone();
        assert_eq!(rechosen, chosen);
    }

    #[test]
    fn different_keys_spread_across_endpoints() {
        let balancer = ConsistentHashBalancer::new();
        let endpoints = endpoints();

        let mut seen = std::collections::HashSet::new();
        for i in 0..200 {
            let request = request_for(&format!("user{i}"));
            seen.insert(balancer.select(&endpoints, &request).unwrap().clone());
        }
        assert_eq!(seen.len(), endpoints.len());
    }

    #[test]
    fn adding_one_endpoint_remaps_a_small_fraction() {
        let balancer = ConsistentHashBalancer::new();
        let three = endpoints();
        let mut four = three.clone();
        four.push(Endpoint::new("127.0.0.1", 8004));

        let total = 1000;
        let mut moved = 0;
        for i in 0..total {
            let request = request_for(&format!("user{i}"));
            let before = balancer.select(&three, &request).unwrap().clone();
            let after = balancer.select(&four, &request).unwrap().clone();
            if before != after {
                moved += 1;
            }
        }

        // Expectation is 1/4 of keys; allow generous slack for hash noise.
        assert!(moved > 0, "some keys must move to the new endpoint");
        assert!(
            moved < total / 2,
            "only a fraction may move, got {moved}/{total}"
        );
    }

    #[test]
    fn ring_cache_is_reused_per_set() {
        let balancer = ConsistentHashBalancer::new();
        let endpoints = endpoints();
        let request = request_for("user123");

        balancer.select(&endpoints, &request);
        balancer.select(&endpoints, &request);
        assert_eq!(balancer.cached_rings(), 1);

        let mut shuffled = endpoints.clone();
        shuffled.reverse();
        balancer.select(&shuffled, &request);
        // Same set in different order maps to the same canonical key.
        assert_eq!(balancer.cached_rings(), 1);

        let mut grown = endpoints;
        grown.push(Endpoint::new("127.0.0.1", 8004));
        balancer.select(&grown, &request);
        assert_eq!(balancer.cached_rings(), 2);

        balancer.clear_cache();
        assert_eq!(balancer.cached_rings(), 0);
    }

    #[test]
    fn trivial_inputs() {
        let balancer = ConsistentHashBalancer::new();
        let request = request_for("user123");
        assert!(balancer.select(&[], &request).is_none());

        let only = vec![Endpoint::new("h", 1)];
        assert_eq!(balancer.select(&only, &request), Some(&only[0]));
    }
}
