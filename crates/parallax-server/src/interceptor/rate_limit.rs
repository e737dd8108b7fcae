//! Multi-level rate limiting interceptor.

use std::sync::Arc;

use parallax_common::ratelimit::{RateLimitManager, RateLimited};
use parallax_proto::{
    RpcRequest, RpcResponse, EXT_ERROR_CODE, EXT_RETRY_AFTER_MS, STATUS_RATE_LIMITED,
};

use super::security::ATTR_PRINCIPAL;
use super::Interceptor;

/// Checks admission at four scopes: caller IP, authenticated user,
/// service, then method. The first denial short-circuits.
pub struct RateLimitInterceptor {
    limits: Arc<RateLimitManager>,
    enabled: bool,
}

impl RateLimitInterceptor {
    /// Creates the interceptor over `limits`.
    #[must_use]
    pub fn new(limits: Arc<RateLimitManager>) -> Self {
        Self {
            limits,
            enabled: true,
        }
    }

    /// Disables enforcement while keeping the interceptor in the chain.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn admit(&self, request: &RpcRequest) -> Result<(), RateLimited> {
        if let Some(addr) = request.client_addr.as_deref() {
            let ip = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
            self.limits.check_ip(ip)?;
        }

        if let Some(principal) = request.attributes.get(ATTR_PRINCIPAL) {
            self.limits.check_user(principal)?;
        }

        self.limits.check_service(&request.service_key())?;
        self.limits
            .check_method(&request.interface, &request.method)?;
        Ok(())
    }
}

impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &str {
        "rate-limit"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn pre_process(&self, request: &mut RpcRequest, response: &mut RpcResponse) -> bool {
        if !self.enabled {
            return true;
        }

        match self.admit(request) {
            Ok(()) => true,
            Err(denied) => {
                tracing::warn!(
                    key = %denied.key,
                    service = %request.interface,
                    method = %request.method,
                    "request rate limited"
                );
                response.code = STATUS_RATE_LIMITED;
                response.message = format!("rate limited on {}", denied.key);
                response.payload = None;
                response
                    .extensions
                    .insert(EXT_ERROR_CODE.to_owned(), "RATE_LIMITED".to_owned());
                response.extensions.insert(
                    EXT_RETRY_AFTER_MS.to_owned(),
                    denied.retry_after.as_millis().to_string(),
                );
                false
            }
        }
    }
}
