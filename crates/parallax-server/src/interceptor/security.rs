//! Authentication and authorization interceptor.

use std::sync::Arc;

use parallax_common::security::{
    authorize_method, AuthError, AuthManager, PublicServiceMatcher,
};
use parallax_proto::{RpcRequest, RpcResponse, EXT_ERROR_CODE, STATUS_UNAUTHENTICATED};

use super::Interceptor;

/// Request attribute carrying the authenticated principal.
pub const ATTR_PRINCIPAL: &str = "auth.principal";
/// Request attribute carrying the granted roles, comma-joined.
pub const ATTR_ROLES: &str = "auth.roles";

/// Validates tokens and enforces role policy before dispatch.
///
/// Public services (by interface-name pattern) bypass authentication
/// entirely. Everyone else must present a token: three dot-separated
/// segments try the signed path first, then the opaque-key path.
pub struct SecurityInterceptor {
    auth: Arc<AuthManager>,
    public: PublicServiceMatcher,
    enabled: bool,
}

impl SecurityInterceptor {
    /// Creates the interceptor over `auth` with default public patterns.
    #[must_use]
    pub fn new(auth: Arc<AuthManager>) -> Self {
        Self::with_public_matcher(auth, PublicServiceMatcher::default())
    }

    /// Creates the interceptor with an explicit public-service allow-list.
    #[must_use]
    pub fn with_public_matcher(auth: Arc<AuthManager>, public: PublicServiceMatcher) -> Self {
        Self {
            auth,
            public,
            enabled: true,
        }
    }

    /// Disables enforcement while keeping the interceptor in the chain.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn reject(response: &mut RpcResponse, error: &AuthError) {
        response.code = STATUS_UNAUTHENTICATED;
        response.message = format!("authentication failed: {error}");
        response.payload = None;
        response
            .extensions
            .insert(EXT_ERROR_CODE.to_owned(), error.code().to_owned());
    }
}

impl Interceptor for SecurityInterceptor {
    fn name(&self) -> &str {
        "security"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn pre_process(&self, request: &mut RpcRequest, response: &mut RpcResponse) -> bool {
        if !self.enabled {
            return true;
        }

        if self.public.is_public(&request.interface) {
            tracing::debug!(service = %request.interface, "public service, skipping auth");
            return true;
        }

        let Some(token) = request.token.as_deref().filter(|t| !t.trim().is_empty()) else {
            tracing::warn!(
                service = %request.interface,
                method = %request.method,
                "missing authentication token"
            );
            Self::reject(response, &AuthError::MissingToken);
            return false;
        };

        let context = match self.auth.authenticate(token, Some(&request.interface)) {
            Ok(context) => context,
            Err(error) => {
                tracing::warn!(
                    service = %request.interface,
                    method = %request.method,
                    error = %error,
                    "token validation failed"
                );
                Self::reject(response, &error);
                return false;
            }
        };

        if let Err(error) = authorize_method(&context, &request.method) {
            tracing::warn!(
                service = %request.interface,
                method = %request.method,
                principal = %context.principal,
                "insufficient permissions"
            );
            Self::reject(response, &error);
            return false;
        }

        request
            .attributes
            .insert(ATTR_PRINCIPAL.to_owned(), context.principal.clone());
        request
            .attributes
            .insert(ATTR_ROLES.to_owned(), context.roles.join(","));
        true
    }

    fn post_process(&self, _request: &RpcRequest, _response: &RpcResponse) {
        // Attributes die with the request; nothing to scrub server-side.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interceptor() -> (SecurityInterceptor, Arc<AuthManager>) {
        let auth = Arc::new(AuthManager::new("interceptor-test-secret"));
        (SecurityInterceptor::new(auth.clone()), auth)
    }

    fn request_for(interface: &str, method: &str, token: Option<String>) -> RpcRequest {
        let mut request = RpcRequest::new(interface, method, vec![]);
        request.token = token;
        request
    }

    #[test]
    fn missing_token_rejected_with_code() {
        let (interceptor, _auth) = interceptor();
        let mut request = request_for("OrderService", "placeOrder", None);
        let mut response = RpcResponse::default();

        assert!(!interceptor.pre_process(&mut request, &mut response));
        assert_eq!(response.code, STATUS_UNAUTHENTICATED);
        assert_eq!(
            response.extensions.get(EXT_ERROR_CODE).map(String::as_str),
            Some("MISSING_TOKEN")
        );
    }

    #[test]
    fn invalid_token_rejected() {
        let (interceptor, _auth) = interceptor();
        let mut request = request_for("OrderService", "placeOrder", Some("junk".to_owned()));
        let mut response = RpcResponse::default();

        assert!(!interceptor.pre_process(&mut request, &mut response));
        assert_eq!(
            response.extensions.get(EXT_ERROR_CODE).map(String::as_str),
            Some("INVALID_TOKEN")
        );
    }

    #[test]
    fn valid_token_admits_and_stashes_context() {
        let (interceptor, auth) = interceptor();
        let token = auth.generate_token("alice", &["admin"]).unwrap();
        let mut request = request_for("OrderService", "placeOrder", Some(token));
        let mut response = RpcResponse::default();

        assert!(interceptor.pre_process(&mut request, &mut response));
        assert_eq!(
            request.attributes.get(ATTR_PRINCIPAL).map(String::as_str),
            Some("alice")
        );
        assert_eq!(
            request.attributes.get(ATTR_ROLES).map(String::as_str),
            Some("admin")
        );
    }

    #[test]
    fn role_policy_enforced() {
        let (interceptor, auth) = interceptor();
        let token = auth.generate_token("bob", &["read"]).unwrap();

        let mut request = request_for("OrderService", "getOrder", Some(token.clone()));
        let mut response = RpcResponse::default();
        assert!(interceptor.pre_process(&mut request, &mut response));

        let mut request = request_for("OrderService", "placeOrder", Some(token));
        let mut response = RpcResponse::default();
        assert!(!interceptor.pre_process(&mut request, &mut response));
        assert_eq!(
            response.extensions.get(EXT_ERROR_CODE).map(String::as_str),
            Some("INSUFFICIENT_PERMISSIONS")
        );
    }

    #[test]
    fn public_services_bypass() {
        let (interceptor, _auth) = interceptor();
        let mut request = request_for("HealthCheckService", "ping", None);
        let mut response = RpcResponse::default();
        assert!(interceptor.pre_process(&mut request, &mut response));
    }

    #[test]
    fn api_key_path_works() {
        let (interceptor, auth) = interceptor();
        let key = auth.generate_api_key("OrderService", &["service"]);
        let mut request = request_for("OrderService", "placeOrder", Some(key));
        let mut response = RpcResponse::default();
        assert!(interceptor.pre_process(&mut request, &mut response));
    }

    #[test]
    fn disabled_interceptor_admits_everything() {
        let (interceptor, _auth) = interceptor();
        let interceptor = interceptor.disabled();
        let mut request = request_for("OrderService", "placeOrder", None);
        let mut response = RpcResponse::default();
        assert!(interceptor.pre_process(&mut request, &mut response));
    }
}
