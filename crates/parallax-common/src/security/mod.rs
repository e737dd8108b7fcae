//! Authentication and authorization.
//!
//! Two credential mechanisms feed one [`AuthContext`]: HMAC-signed tokens
//! (JWT, HS256) and opaque server-registered API keys. The manager caches
//! successful validations and sweeps expired entries in the background.

mod api_key;
mod manager;
mod token;

pub use api_key::{ApiKeyInfo, ApiKeyRegistry};
pub use manager::{AuthCacheStats, AuthManager};
pub use token::{Claims, TokenProvider};

use thiserror::Error;

/// How a caller authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    /// HMAC-signed token.
    Signed,
    /// Opaque registered key.
    ApiKey,
}

/// A validated caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Authenticated principal (user id or service id).
    pub principal: String,
    /// Granted roles.
    pub roles: Vec<String>,
    /// Credential mechanism.
    pub auth_type: AuthType,
    /// Expiry, milliseconds since the Unix epoch; `None` never expires.
    pub expires_at_ms: Option<u64>,
}

impl AuthContext {
    /// Whether the context grants `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether the context has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at_ms
            .is_some_and(|expires| parallax_proto::now_millis() >= expires)
    }
}

/// Authentication and authorization failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The request carried no token but the service requires one.
    #[error("missing authentication token")]
    MissingToken,

    /// The token failed validation.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The caller authenticated but lacks a role for the method.
    #[error("insufficient permissions for {0}")]
    InsufficientPermissions(String),
}

impl AuthError {
    /// Machine-readable failure code carried in response extensions.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "MISSING_TOKEN",
            Self::InvalidToken(_) => "INVALID_TOKEN",
            Self::InsufficientPermissions(_) => "INSUFFICIENT_PERMISSIONS",
        }
    }
}

/// Method-name prefixes treated as read intent.
const READ_PREFIXES: [&str; 5] = ["get", "query", "find", "list", "search"];

/// Whether a method name signals read intent.
#[must_use]
pub fn is_read_method(method: &str) -> bool {
    let lower = method.to_lowercase();
    READ_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
}

/// Role-based method authorization.
///
/// `admin` and `service` pass everywhere; `read` passes read-intent methods;
/// `write` passes the rest.
pub fn authorize_method(context: &AuthContext, method: &str) -> Result<(), AuthError> {
    if context.has_role("admin") || context.has_role("service") {
        return Ok(());
    }

    let read_intent = is_read_method(method);
    if read_intent && context.has_role("read") {
        return Ok(());
    }
    if !read_intent && context.has_role("write") {
        return Ok(());
    }

    Err(AuthError::InsufficientPermissions(method.to_owned()))
}

/// Allow-list matcher for services that bypass authentication.
#[derive(Debug, Clone)]
pub struct PublicServiceMatcher {
    patterns: Vec<String>,
}

impl PublicServiceMatcher {
    /// Creates a matcher over substring patterns.
    #[must_use]
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Whether `interface` matches any public pattern.
    #[must_use]
    pub fn is_public(&self, interface: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| interface.contains(pattern.as_str()))
    }
}

impl Default for PublicServiceMatcher {
    /// Health-check and system-info services ship public.
    fn default() -> Self {
        Self::new(vec!["HealthCheck".to_owned(), "SystemInfo".to_owned()])
    }
}
