//! Multiplexing RPC client for the Parallax framework.
//!
//! Calls multiplex over pooled persistent connections: request IDs
//! correlate responses, so one connection carries any number of
//! overlapping calls. Discovery, load balancing, circuit breaking, retry,
//! rate-limit-aware responses, metrics, and tracing all hang off the call
//! pipeline in [`client::RpcClient::call`].

pub mod client;
pub mod connection;
pub mod error;
pub mod facade;
pub mod hooks;
pub mod multiplex;
pub mod pool;

pub use client::RpcClient;
pub use connection::{ConnectionState, PooledConnection};
pub use error::{ClientError, Result};
pub use facade::{AsyncRpcClient, CallHandle};
pub use hooks::{ClientShutdownHook, MetricsReportHook};
pub use multiplex::PendingMap;
pub use pool::{ConnectionPool, ConnectionPoolStats, OverallConnectionStats, PoolManager};
