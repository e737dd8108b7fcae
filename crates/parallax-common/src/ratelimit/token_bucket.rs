//! Token bucket rate limiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::{LimiterStats, RateLimitConfig, RateLimiter};

/// Token bucket with lock-free refill and deduction.
///
/// Tokens refill continuously at `rate` per second up to `capacity`, so
/// bursts of up to `capacity` permits are admitted after an idle period.
/// Both refill and deduction retry their CAS on contention; no lock is
/// taken on the admission path.
#[derive(Debug)]
pub struct TokenBucketRateLimiter {
    config: RateLimitConfig,
    tokens: AtomicU64,
    /// Milliseconds since `origin` of the last refill accounting.
    last_refill_ms: AtomicU64,
    total: AtomicU64,
    limited: AtomicU64,
    origin: Instant,
}

impl TokenBucketRateLimiter {
    /// Creates a full bucket.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            tokens: AtomicU64::new(config.capacity),
            last_refill_ms: AtomicU64::new(0),
            total: AtomicU64::new(0),
            limited: AtomicU64::new(0),
            origin: Instant::now(),
            config,
        }
    }

    /// Tokens currently available, for diagnostics.
    #[must_use]
    pub fn available(&self) -> u64 {
        self.refill();
        self.tokens.load(Ordering::Acquire)
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn refill(&self) {
        loop {
            let last = self.last_refill_ms.load(Ordering::Acquire);
            let now = self.now_ms();
            let elapsed = now.saturating_sub(last);
            if elapsed == 0 {
                return;
            }

            let new_tokens = elapsed * self.config.rate / 1000;
            if new_tokens == 0 {
                return;
            }

            // Advance the refill clock only by the milliseconds actually
            // converted into tokens, so fractional progress is not lost.
            let advance = new_tokens * 1000 / self.config.rate;
            if self
                .last_refill_ms
                .compare_exchange(last, last + advance, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            let mut current = self.tokens.load(Ordering::Acquire);
            loop {
                let next = current.saturating_add(new_tokens).min(self.config.capacity);
                match self.tokens.compare_exchange(
                    current,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return,
                    Err(actual) => current = actual,
                }
            }
        }
    }
}

impl RateLimiter for TokenBucketRateLimiter {
    fn try_acquire_many(&self, permits: u64) -> bool {
        if !self.config.enabled || permits == 0 {
            return true;
        }

        self.total.fetch_add(1, Ordering::Relaxed);
        self.refill();

        let mut current = self.tokens.load(Ordering::Acquire);
        loop {
            if current < permits {
                self.limited.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    permits,
                    available = current,
                    "token bucket denied acquisition"
                );
                return false;
            }
            match self.tokens.compare_exchange(
                current,
                current - permits,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn stats(&self) -> LimiterStats {
        LimiterStats {
            total: self.total.load(Ordering::Relaxed),
            limited: self.limited.load(Ordering::Relaxed),
        }
    }

    fn retry_after(&self) -> Duration {
        let available = self.tokens.load(Ordering::Acquire);
        if available > 0 {
            return Duration::ZERO;
        }
        // Time to refill a single token.
        Duration::from_millis(1000 / self.config.rate.max(1))
    }
}
