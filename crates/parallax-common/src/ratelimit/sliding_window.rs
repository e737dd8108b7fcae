//! Sliding window rate limiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::{LimiterStats, RateLimitConfig, RateLimiter};

/// Sliding window over a ring of per-slice counters.
///
/// The window is divided into fixed-duration slices; admissions increment
/// the current slice and the decision sums every slice still inside the
/// trailing window. Smoother than a token bucket at the cost of one atomic
/// sweep per acquisition.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    config: RateLimitConfig,
    slice_ms: u64,
    counts: Vec<AtomicU64>,
    /// Start time of the window each slice currently belongs to.
    slice_starts: Vec<AtomicU64>,
    total: AtomicU64,
    limited: AtomicU64,
    origin: Instant,
}

impl SlidingWindowRateLimiter {
    /// Creates an empty window.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let slices = config.window_slices.max(1);
        let slice_ms = (config.window.as_millis() as u64 / slices as u64).max(1);
        Self {
            slice_ms,
            counts: (0..slices).map(|_| AtomicU64::new(0)).collect(),
            slice_starts: (0..slices).map(|_| AtomicU64::new(u64::MAX)).collect(),
            total: AtomicU64::new(0),
            limited: AtomicU64::new(0),
            origin: Instant::now(),
            config,
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Resets slices whose recorded start has fallen out of the ring's
    /// current rotation, then returns the trailing-window sum.
    fn window_count(&self, now: u64) -> u64 {
        let window_ms = self.config.window.as_millis() as u64;
        let mut sum = 0;

        for index in 0..self.counts.len() {
            let start = self.slice_starts[index].load(Ordering::Acquire);
            if start == u64::MAX {
                continue;
            }
            if now.saturating_sub(start) >= window_ms {
                // Slice is entirely outside the trailing window: clear it so
                // a later rotation starts from zero.
                if self.slice_starts[index]
                    .compare_exchange(start, u64::MAX, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.counts[index].store(0, Ordering::Release);
                }
                continue;
            }
            sum += self.counts[index].load(Ordering::Acquire);
        }

        sum
    }

    fn current_slice(&self, now: u64) -> usize {
        ((now / self.slice_ms) as usize) % self.counts.len()
    }
}

impl RateLimiter for SlidingWindowRateLimiter {
    fn try_acquire_many(&self, permits: u64) -> bool {
        if !self.config.enabled || permits == 0 {
            return true;
        }

        self.total.fetch_add(1, Ordering::Relaxed);

        let now = self.now_ms();
        let index = self.current_slice(now);
        let slice_start = now - now % self.slice_ms;

        // Claim the slice for the current rotation if a previous rotation
        // (or no rotation) owns it.
        let owner = self.slice_starts[index].load(Ordering::Acquire);
        if owner != slice_start
            && self.slice_starts[index]
                .compare_exchange(owner, slice_start, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.counts[index].store(0, Ordering::Release);
        }

        let in_window = self.window_count(now);
        if in_window + permits > self.config.rate {
            self.limited.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                permits,
                in_window,
                limit = self.config.rate,
                "sliding window denied acquisition"
            );
            return false;
        }

        self.counts[index].fetch_add(permits, Ordering::AcqRel);
        true
    }

    fn stats(&self) -> LimiterStats {
        LimiterStats {
            total: self.total.load(Ordering::Relaxed),
            limited: self.limited.load(Ordering::Relaxed),
        }
    }

    fn retry_after(&self) -> Duration {
        // The oldest slice expires within one slice duration.
        Duration::from_millis(self.slice_ms)
    }
}
