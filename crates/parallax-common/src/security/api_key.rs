//! Opaque API key registry.

use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::{AuthContext, AuthError, AuthType};

/// Default key lifetime: 30 days.
const DEFAULT_EXPIRY_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Server-side record for one issued key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyInfo {
    /// Service the key was issued to.
    pub service_id: String,
    /// Granted roles.
    pub roles: Vec<String>,
    /// Issue time, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Expiry, milliseconds since the Unix epoch.
    pub expires_at_ms: u64,
    /// Disabled keys fail validation without being forgotten.
    pub enabled: bool,
}

/// Registry mapping opaque keys to their records.
#[derive(Debug, Default)]
pub struct ApiKeyRegistry {
    keys: DashMap<String, ApiKeyInfo>,
}

impl ApiKeyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: DashMap::new(),
        }
    }

    /// Generates, registers, and returns a key for `service_id` with the
    /// default 30-day expiry.
    pub fn generate(&self, service_id: &str, roles: &[&str]) -> String {
        self.generate_with_expiry(service_id, roles, DEFAULT_EXPIRY_MS)
    }

    /// Generates a key expiring `expiry_ms` from now.
    pub fn generate_with_expiry(&self, service_id: &str, roles: &[&str], expiry_ms: u64) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let key = format!("pk-{suffix}");

        let now = parallax_proto::now_millis();
        self.keys.insert(
            key.clone(),
            ApiKeyInfo {
                service_id: service_id.to_owned(),
                roles: roles.iter().map(|r| (*r).to_owned()).collect(),
                created_at_ms: now,
                expires_at_ms: now + expiry_ms,
                enabled: true,
            },
        );

        tracing::info!(service_id, "issued API key");
        key
    }

    /// Validates `key`: existence, enablement, service match, expiry.
    ///
    /// `expected_service` of `None` skips the service check.
    pub fn validate(
        &self,
        key: &str,
        expected_service: Option<&str>,
    ) -> Result<AuthContext, AuthError> {
        let info = self
            .keys
            .get(key)
            .ok_or_else(|| AuthError::InvalidToken("unknown API key".to_owned()))?;

        if !info.enabled {
            return Err(AuthError::InvalidToken("API key disabled".to_owned()));
        }

        if let Some(expected) = expected_service {
            if info.service_id != expected {
                return Err(AuthError::InvalidToken(format!(
                    "API key not issued to {expected}"
                )));
            }
        }

        if parallax_proto::now_millis() >= info.expires_at_ms {
            return Err(AuthError::InvalidToken("API key expired".to_owned()));
        }

        Ok(AuthContext {
            principal: info.service_id.clone(),
            roles: info.roles.clone(),
            auth_type: AuthType::ApiKey,
            expires_at_ms: Some(info.expires_at_ms),
        })
    }

    /// Disables a key without removing its record.
    pub fn disable(&self, key: &str) -> bool {
        match self.keys.get_mut(key) {
            Some(mut info) => {
                info.enabled = false;
                true
            }
            None => false,
        }
    }

    /// Removes a key entirely.
    pub fn revoke(&self, key: &str) -> bool {
        self.keys.remove(key).is_some()
    }

    /// Number of registered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when no keys are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_validate() {
        let registry = ApiKeyRegistry::new();
        let key = registry.generate("billing", &["service"]);
        assert!(key.starts_with("pk-"));

        let context = registry.validate(&key, Some("billing")).unwrap();
        assert_eq!(context.principal, "billing");
        assert_eq!(context.auth_type, AuthType::ApiKey);
        assert!(context.has_role("service"));
    }

    #[test]
    fn unknown_key_fails() {
        let registry = ApiKeyRegistry::new();
        assert!(registry.validate("pk-nope", None).is_err());
    }

    #[test]
    fn service_mismatch_fails() {
        let registry = ApiKeyRegistry::new();
        let key = registry.generate("billing", &["service"]);
        assert!(registry.validate(&key, Some("orders")).is_err());
        // No expectation skips the check.
        assert!(registry.validate(&key, None).is_ok());
    }

    #[test]
    fn disabled_key_fails() {
        let registry = ApiKeyRegistry::new();
        let key = registry.generate("billing", &["service"]);
        assert!(registry.disable(&key));
        assert!(registry.validate(&key, None).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn expired_key_fails() {
        let registry = ApiKeyRegistry::new();
        let key = registry.generate_with_expiry("billing", &["service"], 0);
        assert!(matches!(
            registry.validate(&key, None),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn revoke_removes_the_record() {
        let registry = ApiKeyRegistry::new();
        let key = registry.generate("billing", &[]);
        assert!(registry.revoke(&key));
        assert!(!registry.revoke(&key));
        assert!(registry.is_empty());
    }

    #[test]
    fn keys_are_unique() {
        let registry = ApiKeyRegistry::new();
        let a = registry.generate("svc", &[]);
        let b = registry.generate("svc", &[]);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }
}
