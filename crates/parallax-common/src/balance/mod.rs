//! Load balancing strategies.

mod consistent_hash;
mod random;
mod round_robin;

pub use consistent_hash::ConsistentHashBalancer;
pub use random::RandomBalancer;
pub use round_robin::RoundRobinBalancer;

use parallax_proto::RpcRequest;

use crate::endpoint::Endpoint;
use crate::extension::{ExtensionError, ExtensionLoader};
use crate::extension_factories;

/// Strategy for selecting an endpoint from a discovered list.
///
/// Implementations must tolerate empty input (`None`) and single-element
/// input (return the sole endpoint), and must be safe under concurrent
/// callers.
pub trait LoadBalancer: Send + Sync {
    /// The extension name of this strategy.
    fn name(&self) -> &'static str;

    /// Selects an endpoint for the request.
    fn select<'a>(&self, endpoints: &'a [Endpoint], request: &RpcRequest) -> Option<&'a Endpoint>;
}

/// Descriptor resource for the balancer capability.
pub const DESCRIPTOR: &str = include_str!("../../descriptors/balancer.extension");

/// Builds the extension loader for the built-in balancers.
///
/// The first declared entry (`random`) is the default strategy; callers
/// that depend on consistent hashing must name it explicitly.
pub fn loader() -> ExtensionLoader<dyn LoadBalancer> {
    let factories = extension_factories!(dyn LoadBalancer;
        "balance::RandomBalancer" => RandomBalancer::new(),
        "balance::RoundRobinBalancer" => RoundRobinBalancer::new(),
        "balance::ConsistentHashBalancer" => ConsistentHashBalancer::new(),
    );
    ExtensionLoader::from_descriptor(DESCRIPTOR, factories)
        .unwrap_or_else(|e| unreachable!("embedded balancer descriptor is valid: {e}"))
}

/// Common guard for the trivial selection cases.
pub(crate) fn trivial_selection(endpoints: &[Endpoint]) -> Option<Option<&Endpoint>> {
    match endpoints.len() {
        0 => Some(None),
        1 => Some(endpoints.first()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_exposes_builtin_strategies() {
        let loader = loader();
        assert_eq!(loader.capability(), "parallax.balancer");
        assert_eq!(loader.names(), vec!["random", "round_robin", "consistent_hash"]);
        assert_eq!(loader.get("round_robin").unwrap().name(), "round_robin");
    }

    #[test]
    fn default_strategy_is_random() {
        let loader = loader();
        assert_eq!(loader.get_default().unwrap().name(), "random");
    }
}
