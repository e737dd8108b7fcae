//! Server error types.

use thiserror::Error;

/// Errors from server startup and operation.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The configured bind address does not parse.
    #[error("invalid bind address: {0}")]
    InvalidAddress(String),

    /// Binding the listener failed.
    #[error("failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },

    /// Registration with the coordination store failed.
    #[error(transparent)]
    Registry(#[from] parallax_registry::RegistryError),

    /// I/O error on the listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
