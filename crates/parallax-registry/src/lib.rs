//! Service registration and discovery for the Parallax RPC framework.
//!
//! Servers register `host:port` endpoints as ephemeral sequential nodes
//! under `/rpc-services/{service}`; clients discover endpoints once and
//! keep their cache current through child watches. The coordination
//! service itself is external; [`store::CoordinationStore`] captures the
//! contract and [`memory::MemoryStore`] implements it in-process.

pub mod client;
pub mod error;
pub mod memory;
pub mod store;

pub use client::{BackoffConfig, ServiceDiscovery, ServiceRegistry, BASE_PATH};
pub use error::{RegistryError, StoreError};
pub use memory::MemoryStore;
pub use store::{ChildWatch, ChildrenChanged, CoordinationStore, SessionId};
