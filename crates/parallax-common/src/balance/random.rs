//! Uniform random selection.

use parallax_proto::RpcRequest;
use rand::Rng;

use super::{trivial_selection, LoadBalancer};
use crate::endpoint::Endpoint;

/// Stateless uniform selection.
#[derive(Debug, Default)]
pub struct RandomBalancer;

impl RandomBalancer {
    /// Creates a random balancer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomBalancer {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select<'a>(&self, endpoints: &'a [Endpoint], _request: &RpcRequest) -> Option<&'a Endpoint> {
        if let Some(trivial) = trivial_selection(endpoints) {
            return trivial;
        }
        let index = rand::thread_rng().gen_range(0..endpoints.len());
        endpoints.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Vec<Endpoint> {
        vec![
            Endpoint::new("127.0.0.1", 8001),
            Endpoint::new("127.0.0.1", 8002),
            Endpoint::new("127.0.0.1", 8003),
        ]
    }

    #[test]
    fn empty_list_yields_none() {
        let balancer = RandomBalancer::new();
        let request = RpcRequest::new("hello", "greet", vec![]);
        assert!(balancer.select(&[], &request).is_none());
    }

    #[test]
    fn single_endpoint_is_returned() {
        let balancer = RandomBalancer::new();
        let request = RpcRequest::new("hello", "greet", vec![]);
        let only = vec![Endpoint::new("h", 1)];
        assert_eq!(balancer.select(&only, &request), Some(&only[0]));
    }

    #[test]
    fn always_selects_a_member() {
        let balancer = RandomBalancer::new();
        let request = RpcRequest::new("hello", "greet", vec![]);
        let endpoints = endpoints();
        for _ in 0..200 {
            let selected = balancer.select(&endpoints, &request).unwrap();
            assert!(endpoints.contains(selected));
        }
    }

    #[test]
    fn covers_every_member_eventually() {
        let balancer = RandomBalancer::new();
        let request = RpcRequest::new("hello", "greet", vec![]);
        let endpoints = endpoints();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(balancer.select(&endpoints, &request).unwrap().clone());
        }
        assert_eq!(seen.len(), endpoints.len());
    }
}
