//! Server-side interceptor chain.
//!
//! Pre-processors run ascending by priority; a `false` return
//! short-circuits dispatch and the response carries whatever the
//! interceptor wrote into it. Post-processors run in reverse order after
//! dispatch; business failures additionally reach the `on_exception`
//! hooks.

mod rate_limit;
mod security;

pub use rate_limit::RateLimitInterceptor;
pub use security::{SecurityInterceptor, ATTR_PRINCIPAL, ATTR_ROLES};

use std::sync::Arc;

use parallax_proto::{RpcRequest, RpcResponse};

/// A server-side interceptor.
pub trait Interceptor: Send + Sync {
    /// Interceptor name for logs.
    fn name(&self) -> &str;

    /// Execution order; smaller runs earlier.
    fn priority(&self) -> i32 {
        100
    }

    /// Runs before dispatch. Returning `false` rejects the request; the
    /// interceptor must have written the rejection into `response`.
    fn pre_process(&self, request: &mut RpcRequest, response: &mut RpcResponse) -> bool;

    /// Runs after dispatch, in reverse order.
    fn post_process(&self, _request: &RpcRequest, _response: &RpcResponse) {}

    /// Observes business failures raised by the dispatched handler.
    fn on_exception(&self, _request: &RpcRequest, _response: &RpcResponse, _error: &str) {}
}

/// Ordered interceptor chain.
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an interceptor, keeping the chain sorted by priority.
    pub fn add(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
        self.interceptors.sort_by_key(|i| i.priority());
    }

    /// Number of interceptors in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// True when the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs pre-processors in order; `false` means the request was
    /// rejected and `response` holds the rejection.
    pub fn pre_process(&self, request: &mut RpcRequest, response: &mut RpcResponse) -> bool {
        for interceptor in &self.interceptors {
            if !interceptor.pre_process(request, response) {
                tracing::debug!(
                    interceptor = interceptor.name(),
                    service = %request.interface,
                    method = %request.method,
                    code = response.code,
                    "request rejected by interceptor"
                );
                return false;
            }
        }
        true
    }

    /// Runs post-processors in reverse order.
    pub fn post_process(&self, request: &RpcRequest, response: &RpcResponse) {
        for interceptor in self.interceptors.iter().rev() {
            interceptor.post_process(request, response);
        }
    }

    /// Notifies every interceptor of a business failure.
    pub fn on_exception(&self, request: &RpcRequest, response: &RpcResponse, error: &str) {
        for interceptor in &self.interceptors {
            interceptor.on_exception(request, response, error);
        }
    }
}
