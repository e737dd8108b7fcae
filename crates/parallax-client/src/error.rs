//! Client-side error taxonomy.

use parallax_common::retry::{transport_message_is_retriable, RetryableError};
use parallax_common::CircuitOpen;
use parallax_proto::ProtocolError;
use parallax_registry::RegistryError;
use thiserror::Error;

/// Errors surfaced by the client call pipeline.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection establishment exceeded the connect timeout.
    #[error("connect timeout to {0}")]
    ConnectTimeout(String),

    /// No response arrived within the request timeout.
    #[error("request {0} timed out")]
    RequestTimeout(u64),

    /// The transport failed mid-call.
    #[error("transport error: {0}")]
    Transport(String),

    /// The wire protocol was violated.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The per-endpoint pool is at capacity with a full waiter queue.
    #[error("connection pool saturated for {0}")]
    PoolSaturated(String),

    /// The pool was closed while the call waited on it.
    #[error("connection pool closed")]
    PoolClosed,

    /// The async facade is at its in-flight bound.
    #[error("client saturated: too many in-flight requests")]
    Saturated,

    /// The call was cancelled before completion.
    #[error("call cancelled")]
    Cancelled,

    /// The circuit breaker rejected the call.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),

    /// Discovery failed or produced no endpoints.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The client configuration names an unknown extension.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RetryableError for ClientError {
    fn is_retriable(&self) -> bool {
        match self {
            Self::ConnectTimeout(_) | Self::RequestTimeout(_) => true,
            Self::Transport(message) => transport_message_is_retriable(message),
            _ => false,
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_retriable() {
        assert!(ClientError::ConnectTimeout("h:1".into()).is_retriable());
        assert!(ClientError::RequestTimeout(7).is_retriable());
    }

    #[test]
    fn transport_retriability_follows_the_message() {
        assert!(ClientError::Transport("Connection refused (os error 111)".into()).is_retriable());
        assert!(ClientError::Transport("Connection reset by peer".into()).is_retriable());
        assert!(!ClientError::Transport("broken frame".into()).is_retriable());
    }

    #[test]
    fn structural_errors_are_not_retriable() {
        assert!(!ClientError::PoolSaturated("h:1".into()).is_retriable());
        assert!(!ClientError::PoolClosed.is_retriable());
        assert!(!ClientError::Saturated.is_retriable());
        assert!(!ClientError::Cancelled.is_retriable());
        assert!(!ClientError::CircuitOpen(CircuitOpen {
            service: "svc".into()
        })
        .is_retriable());
    }
}
