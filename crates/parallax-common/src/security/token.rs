//! Signed token issuance and verification.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::{AuthContext, AuthError, AuthType};

/// Default token lifetime: 24 hours.
const DEFAULT_EXPIRY_SECS: u64 = 24 * 60 * 60;

/// Token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject: the authenticated principal.
    pub sub: String,
    /// Issued-at, seconds since the Unix epoch.
    pub iat: u64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
    /// Granted roles.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Issues and verifies HS256-signed tokens.
///
/// The signing secret comes from configuration; rotating it invalidates all
/// outstanding tokens, so rotations should overlap with the validation
/// cache sweep.
pub struct TokenProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenProvider {
    /// Creates a provider over the configured secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Issues a token for `principal` with the default 24-hour expiry.
    pub fn generate(&self, principal: &str, roles: &[&str]) -> Result<String, AuthError> {
        self.generate_with_expiry(principal, roles, DEFAULT_EXPIRY_SECS)
    }

    /// Issues a token expiring `expiry_secs` from now.
    pub fn generate_with_expiry(
        &self,
        principal: &str,
        roles: &[&str],
        expiry_secs: u64,
    ) -> Result<String, AuthError> {
        let now = parallax_proto::now_millis() / 1000;
        let claims = Claims {
            sub: principal.to_owned(),
            iat: now,
            exp: now + expiry_secs,
            roles: roles.iter().map(|r| (*r).to_owned()).collect(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// Verifies a token: format, signature, then expiry.
    pub fn validate(&self, token: &str) -> Result<AuthContext, AuthError> {
        if token.split('.').count() != 3 {
            return Err(AuthError::InvalidToken(
                "expected three dot-separated segments".to_owned(),
            ));
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        Ok(AuthContext {
            principal: data.claims.sub,
            roles: data.claims.roles,
            auth_type: AuthType::Signed,
            expires_at_ms: Some(data.claims.exp * 1000),
        })
    }

    /// Extracts the subject without full validation. Diagnostic use only.
    pub fn parse_principal(&self, token: &str) -> Result<String, AuthError> {
        self.validate(token).map(|context| context.principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> TokenProvider {
        TokenProvider::new("unit-test-secret")
    }

    #[test]
    fn issue_and_validate() {
        let provider = provider();
        let token = provider.generate("alice", &["read", "write"]).unwrap();

        let context = provider.validate(&token).unwrap();
        assert_eq!(context.principal, "alice");
        assert_eq!(context.roles, vec!["read", "write"]);
        assert_eq!(context.auth_type, AuthType::Signed);
        assert!(!context.is_expired());
    }

    #[test]
    fn rejects_malformed_tokens() {
        let provider = provider();
        assert!(matches!(
            provider.validate("not-a-token"),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(provider.validate("one.two").is_err());
        assert!(provider.validate("a.b.c.d").is_err());
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = provider().generate("alice", &["admin"]).unwrap();
        let other = TokenProvider::new("different-secret");
        assert!(other.validate(&token).is_err());
    }

    #[test]
    fn rejects_tampered_payload() {
        let token = provider().generate("alice", &["read"]).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged_payload = parts[1].replacen(|c: char| c.is_ascii_alphanumeric(), "A", 1);
        parts[1] = &forged_payload;
        let forged = parts.join(".");
        assert!(provider().validate(&forged).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let provider = provider();
        let token = provider.generate_with_expiry("bob", &["read"], 0).unwrap();
        // exp == iat, so the token is already past its lifetime.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(matches!(
            provider.validate(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn parse_principal() {
        let provider = provider();
        let token = provider.generate("carol", &[]).unwrap();
        assert_eq!(provider.parse_principal(&token).unwrap(), "carol");
    }
}
