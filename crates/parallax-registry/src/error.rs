//! Error types for registration and discovery.

use thiserror::Error;

/// Errors from the coordination store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store is unreachable.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// The referenced node does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// The referenced session does not exist or has expired.
    #[error("session not found: {0}")]
    SessionNotFound(u64),
}

/// Errors from the registry client.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Discovery produced no endpoints for the service.
    #[error("no endpoints available for {0}")]
    NoEndpoints(String),

    /// The coordination store failed after retries.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A child node carried an unparseable address body.
    #[error("invalid endpoint data {data:?} under {service}")]
    InvalidEndpointData { service: String, data: String },
}

/// Result alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
