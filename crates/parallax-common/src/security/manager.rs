//! Authentication manager with validation caching.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use super::{ApiKeyRegistry, AuthContext, AuthError, TokenProvider};

/// Cache counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthCacheStats {
    /// Entries currently cached.
    pub entries: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that required full validation.
    pub misses: u64,
}

/// Validates credentials and caches successful results.
///
/// Signed tokens are cached by the token string; API keys by
/// `key|service_id` since the same key can be checked against different
/// service expectations. A background sweep drops expired entries.
pub struct AuthManager {
    tokens: TokenProvider,
    api_keys: ApiKeyRegistry,
    cache: DashMap<String, AuthContext>,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl AuthManager {
    /// Creates a manager signing with `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            tokens: TokenProvider::new(secret),
            api_keys: ApiKeyRegistry::new(),
            cache: DashMap::new(),
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// The API key registry, for issuing and revoking keys.
    #[must_use]
    pub fn api_keys(&self) -> &ApiKeyRegistry {
        &self.api_keys
    }

    /// Issues a signed token.
    pub fn generate_token(&self, principal: &str, roles: &[&str]) -> Result<String, AuthError> {
        self.tokens.generate(principal, roles)
    }

    /// Issues a signed token with an explicit expiry.
    pub fn generate_token_with_expiry(
        &self,
        principal: &str,
        roles: &[&str],
        expiry_secs: u64,
    ) -> Result<String, AuthError> {
        self.tokens.generate_with_expiry(principal, roles, expiry_secs)
    }

    /// Issues and registers an API key.
    pub fn generate_api_key(&self, service_id: &str, roles: &[&str]) -> String {
        self.api_keys.generate(service_id, roles)
    }

    /// Validates a signed token, consulting the cache first.
    pub fn authenticate_signed(&self, token: &str) -> Result<AuthContext, AuthError> {
        self.cached(token.to_owned(), || self.tokens.validate(token))
    }

    /// Validates an API key, consulting the cache first.
    pub fn authenticate_api_key(
        &self,
        key: &str,
        service_id: Option<&str>,
    ) -> Result<AuthContext, AuthError> {
        let cache_key = format!("{key}|{}", service_id.unwrap_or(""));
        self.cached(cache_key, || self.api_keys.validate(key, service_id))
    }

    /// Combined credential path used by the server interceptor.
    ///
    /// Tokens shaped like a signed token (three dot-separated segments) try
    /// the signed path first; anything else, or a signed-path failure,
    /// falls through to the opaque-key path.
    pub fn authenticate(
        &self,
        token: &str,
        service_id: Option<&str>,
    ) -> Result<AuthContext, AuthError> {
        if token.split('.').count() == 3 {
            if let Ok(context) = self.authenticate_signed(token) {
                return Ok(context);
            }
        }
        self.authenticate_api_key(token, service_id)
    }

    fn cached(
        &self,
        cache_key: String,
        validate: impl FnOnce() -> Result<AuthContext, AuthError>,
    ) -> Result<AuthContext, AuthError> {
        use std::sync::atomic::Ordering;

        if let Some(entry) = self.cache.get(&cache_key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.clone());
            }
            drop(entry);
            self.cache.remove(&cache_key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let context = validate()?;
        self.cache.insert(cache_key, context.clone());
        Ok(context)
    }

    /// Drops a cached validation, e.g. after revoking a key.
    pub fn clear_cached(&self, cache_key: &str) {
        self.cache.remove(cache_key);
    }

    /// Removes expired entries. The sweeper calls this periodically.
    pub fn sweep_expired(&self) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, context| !context.is_expired());
        before - self.cache.len()
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> AuthCacheStats {
        use std::sync::atomic::Ordering;
        AuthCacheStats {
            entries: self.cache.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Spawns the periodic cache sweep; cancelled through `cancel`.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = manager.sweep_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "swept expired auth cache entries");
                        }
                    }
                }
            }
        })
    }
}
