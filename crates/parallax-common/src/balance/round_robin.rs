//! Round-robin selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use parallax_proto::RpcRequest;

use super::{trivial_selection, LoadBalancer};
use crate::endpoint::Endpoint;

/// Atomic-counter round robin, tie-broken by the natural endpoint order.
///
/// Sorting before indexing keeps the rotation deterministic even when
/// discovery hands over the same set in a different order.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    /// Creates a round-robin balancer starting at the first endpoint.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select<'a>(&self, endpoints: &'a [Endpoint], _request: &RpcRequest) -> Option<&'a Endpoint> {
        if let Some(trivial) = trivial_selection(endpoints) {
            return trivial;
        }

        let mut order: Vec<usize> = (0..endpoints.len()).collect();
        order.sort_by(|&a, &b| endpoints[a].cmp(&endpoints[b]));

        let tick = self.counter.fetch_add(1, Ordering::Relaxed);
        order
            .get(tick % endpoints.len())
            .and_then(|&index| endpoints.get(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_deterministically() {
        let balancer = RoundRobinBalancer::new();
        let request = RpcRequest::new("hello", "greet", vec![])
            .with_group("default")
            .with_version("1.0");
        let endpoints = vec![
            Endpoint::new("127.0.0.1", 8001),
            Endpoint::new("127.0.0.1", 8002),
            Endpoint::new("127.0.0.1", 8003),
        ];

        let ports: Vec<u16> = (0..6)
            .map(|_| balancer.select(&endpoints, &request).unwrap().port)
            .collect();
        assert_eq!(ports, vec![8001, 8002, 8003, 8001, 8002, 8003]);
    }

    #[test]
    fn rotation_ignores_input_order() {
        let balancer = RoundRobinBalancer::new();
        let request = RpcRequest::new("hello", "greet", vec![]);
        let shuffled = vec![
            Endpoint::new("127.0.0.1", 8003),
            Endpoint::new("127.0.0.1", 8001),
            Endpoint::new("127.0.0.1", 8002),
        ];

        let ports: Vec<u16> = (0..3)
            .map(|_| balancer.select(&shuffled, &request).unwrap().port)
            .collect();
        assert_eq!(ports, vec![8001, 8002, 8003]);
    }

    #[test]
    fn empty_and_single_inputs() {
        let balancer = RoundRobinBalancer::new();
        let request = RpcRequest::new("hello", "greet", vec![]);
        assert!(balancer.select(&[], &request).is_none());

        let only = vec![Endpoint::new("h", 9)];
        assert_eq!(balancer.select(&only, &request), Some(&only[0]));
        // Trivial selection must not advance the counter.
        let pair = vec![Endpoint::new("a", 1), Endpoint::new("b", 2)];
        assert_eq!(balancer.select(&pair, &request).unwrap().port, 1);
    }

    #[test]
    fn no_starvation_under_concurrency() {
        use std::collections::HashMap;
        use std::sync::Arc;

        let balancer = Arc::new(RoundRobinBalancer::new());
        let endpoints = Arc::new(vec![
            Endpoint::new("127.0.0.1", 8001),
            Endpoint::new("127.0.0.1", 8002),
            Endpoint::new("127.0.0.1", 8003),
        ]);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let balancer = balancer.clone();
            let endpoints = endpoints.clone();
            handles.push(std::thread::spawn(move || {
                let request = RpcRequest::new("hello", "greet", vec![]);
                let mut counts: HashMap<u16, usize> = HashMap::new();
                for _ in 0..300 {
                    let port = balancer.select(&endpoints, &request).unwrap().port;
                    *counts.entry(port).or_default() += 1;
                }
                counts
            }));
        }

        let mut totals: HashMap<u16, usize> = HashMap::new();
        for handle in handles {
            for (port, count) in handle.join().unwrap() {
                *totals.entry(port).or_default() += count;
            }
        }

        // 1200 selections over 3 endpoints: exact fairness.
        assert_eq!(totals.values().sum::<usize>(), 1200);
        for port in [8001, 8002, 8003] {
            assert_eq!(totals[&port], 400);
        }
    }
}
