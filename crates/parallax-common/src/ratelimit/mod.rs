//! Rate limiting with per-key limiters.
//!
//! Two algorithms are provided: a token bucket (bursty, refill-based) and a
//! sliding window (smooth, slice-counted). The manager keys limiters by
//! scope prefixes (`ip:`, `user:`, `service:`, `method:`) and exposes the
//! admission checks the server interceptor runs in order.

mod sliding_window;
mod token_bucket;

pub use sliding_window::SlidingWindowRateLimiter;
pub use token_bucket::TokenBucketRateLimiter;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;

/// Admission was denied by a rate limiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rate limited on {key}, retry after {retry_after:?}")]
pub struct RateLimited {
    /// The limiter key that denied admission.
    pub key: String,
    /// Suggested wait before retrying.
    pub retry_after: Duration,
}

/// Limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained admission rate, permits per second.
    pub rate: u64,
    /// Burst capacity (token bucket only).
    pub capacity: u64,
    /// Window length (sliding window only).
    pub window: Duration,
    /// Number of slices in the window ring.
    pub window_slices: usize,
    /// Disabled limiters admit everything.
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: 100,
            capacity: 200,
            window: Duration::from_millis(1000),
            window_slices: 10,
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    /// Quick constructor used by most call sites.
    #[must_use]
    pub fn per_second(rate: u64, capacity: u64) -> Self {
        Self {
            rate,
            capacity,
            ..Self::default()
        }
    }

    /// Sanity check; zero rates or empty windows are misconfigurations.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.rate > 0 && self.capacity > 0 && !self.window.is_zero() && self.window_slices > 0
    }
}

/// Cumulative admission counters for one limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterStats {
    /// Total acquisition attempts.
    pub total: u64,
    /// Denied attempts.
    pub limited: u64,
}

impl LimiterStats {
    /// Fraction of attempts denied, 0.0 when idle.
    #[must_use]
    pub fn limit_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.limited as f64 / self.total as f64
    }
}

/// A rate limiter.
pub trait RateLimiter: Send + Sync {
    /// Attempts to acquire a single permit.
    fn try_acquire(&self) -> bool {
        self.try_acquire_many(1)
    }

    /// Attempts to acquire `permits` permits atomically.
    fn try_acquire_many(&self, permits: u64) -> bool;

    /// Cumulative counters.
    fn stats(&self) -> LimiterStats;

    /// Suggested wait until a single permit is likely available.
    fn retry_after(&self) -> Duration;
}

/// Which algorithm the manager creates for new keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitAlgorithm {
    /// Token bucket with burst capacity.
    #[default]
    TokenBucket,
    /// Sliding window over slice counters.
    SlidingWindow,
}

/// Report line for one limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterReport {
    /// Limiter key including its scope prefix.
    pub key: String,
    /// Total acquisition attempts.
    pub total: u64,
    /// Denied attempts.
    pub limited: u64,
    /// Fraction denied.
    pub limit_rate: f64,
    /// True when the limit rate exceeds the alert threshold (10 %).
    pub alert: bool,
}

/// Alert threshold on the per-limiter limit rate.
const ALERT_LIMIT_RATE: f64 = 0.10;

/// Process-wide registry of named limiters.
pub struct RateLimitManager {
    default_config: RateLimitConfig,
    algorithm: RateLimitAlgorithm,
    limiters: DashMap<String, Arc<dyn RateLimiter>>,
}

impl RateLimitManager {
    /// Creates a manager; unseen keys get `default_config` limiters.
    #[must_use]
    pub fn new(default_config: RateLimitConfig, algorithm: RateLimitAlgorithm) -> Self {
        Self {
            default_config,
            algorithm,
            limiters: DashMap::new(),
        }
    }

    /// Registers an explicitly configured limiter for `key`.
    pub fn configure(&self, key: impl Into<String>, config: RateLimitConfig) {
        let limiter = self.build(config);
        self.limiters.insert(key.into(), limiter);
    }

    fn build(&self, config: RateLimitConfig) -> Arc<dyn RateLimiter> {
        match self.algorithm {
            RateLimitAlgorithm::TokenBucket => Arc::new(TokenBucketRateLimiter::new(config)),
            RateLimitAlgorithm::SlidingWindow => Arc::new(SlidingWindowRateLimiter::new(config)),
        }
    }

    fn limiter(&self, key: &str) -> Arc<dyn RateLimiter> {
        if let Some(limiter) = self.limiters.get(key) {
            return limiter.clone();
        }
        self.limiters
            .entry(key.to_owned())
            .or_insert_with(|| self.build(self.default_config.clone()))
            .clone()
    }

    fn check(&self, key: String) -> Result<(), RateLimited> {
        let limiter = self.limiter(&key);
        if limiter.try_acquire() {
            Ok(())
        } else {
            Err(RateLimited {
                retry_after: limiter.retry_after(),
                key,
            })
        }
    }

    /// Per-caller-IP admission.
    pub fn check_ip(&self, ip: &str) -> Result<(), RateLimited> {
        self.check(format!("ip:{ip}"))
    }

    /// Per-authenticated-user admission.
    pub fn check_user(&self, user: &str) -> Result<(), RateLimited> {
        self.check(format!("user:{user}"))
    }

    /// Per-service admission.
    pub fn check_service(&self, service: &str) -> Result<(), RateLimited> {
        self.check(format!("service:{service}"))
    }

    /// Per-method admission, keyed `service#method`.
    pub fn check_method(&self, service: &str, method: &str) -> Result<(), RateLimited> {
        self.check(format!("method:{service}#{method}"))
    }

    /// Snapshot of every limiter's counters.
    #[must_use]
    pub fn report(&self) -> Vec<LimiterReport> {
        let mut lines: Vec<LimiterReport> = self
            .limiters
            .iter()
            .map(|entry| {
                let stats = entry.value().stats();
                let limit_rate = stats.limit_rate();
                LimiterReport {
                    key: entry.key().clone(),
                    total: stats.total,
                    limited: stats.limited,
                    limit_rate,
                    alert: limit_rate > ALERT_LIMIT_RATE,
                }
            })
            .collect();
        lines.sort_by(|a, b| a.key.cmp(&b.key));
        lines
    }

    /// Logs the report, flagging limiters above the alert threshold.
    pub fn log_report(&self) {
        for line in self.report() {
            if line.alert {
                tracing::warn!(
                    key = %line.key,
                    total = line.total,
                    limited = line.limited,
                    limit_rate = format!("{:.1}%", line.limit_rate * 100.0),
                    "rate limiter above alert threshold"
                );
            } else {
                tracing::info!(
                    key = %line.key,
                    total = line.total,
                    limited = line.limited,
                    "rate limiter report"
                );
            }
        }
    }
}

impl Default for RateLimitManager {
    fn default() -> Self {
        Self::new(RateLimitConfig::default(), RateLimitAlgorithm::TokenBucket)
    }
}
