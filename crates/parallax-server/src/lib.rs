//! RPC server for the Parallax framework.
//!
//! Services register name → handler maps under their composite
//! `interface#group#version` identity; the framed TCP loop decodes
//! requests, runs the interceptor chain (security, rate limiting, custom
//! interceptors), dispatches, and answers in the caller's codec.

pub mod error;
pub mod interceptor;
pub mod server;
pub mod service;

pub use error::{Result, ServerError};
pub use interceptor::{Interceptor, InterceptorChain, RateLimitInterceptor, SecurityInterceptor};
pub use server::RpcServer;
pub use service::{HandlerError, HandlerResult, RpcService};
