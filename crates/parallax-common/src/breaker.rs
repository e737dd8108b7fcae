//! Circuit breaker keyed by service.
//!
//! State machine per service:
//!
//! - **Closed**: requests pass; consecutive failures at the threshold open
//!   the circuit.
//! - **Open**: requests are rejected until the recovery timeout elapses,
//!   then the first caller moves the breaker to half-open.
//! - **HalfOpen**: a bounded number of trial requests pass; enough
//!   successes close the circuit, any failure reopens it.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;

/// Admission was denied because the circuit is open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit open for {service}")]
pub struct CircuitOpen {
    /// Service whose breaker rejected the call.
    pub service: String,
}

/// Breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before the circuit opens.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call is allowed.
    pub recovery_timeout: Duration,
    /// Concurrent trial calls admitted in HalfOpen.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Normal operation.
    Closed = 0,
    /// Rejecting requests.
    Open = 1,
    /// Probing recovery.
    HalfOpen = 2,
}

impl CircuitState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Circuit breaker for a single service.
///
/// All transitions are CAS-based so concurrent callers observe a
/// linearizable state machine without locks on the admission path.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU32,
    half_open_admitted: AtomicU32,
    half_open_successes: AtomicU32,
    /// Milliseconds since `origin` of the most recent failure.
    last_failure_ms: AtomicU64,
    origin: Instant,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            half_open_admitted: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            origin: Instant::now(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Consecutive failure count while Closed.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Asks the breaker whether a call may proceed.
    #[must_use]
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self.now_ms().saturating_sub(self.last_failure_ms.load(Ordering::Acquire));
                if elapsed <= self.config.recovery_timeout.as_millis() as u64 {
                    return false;
                }

                // Recovery window elapsed: the winner of this CAS moves the
                // breaker to half-open and takes the first trial slot.
                if self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.half_open_admitted.store(1, Ordering::Release);
                    self.half_open_successes.store(0, Ordering::Release);
                    tracing::info!("circuit breaker probing recovery (half-open)");
                    return true;
                }

                self.try_half_open_slot()
            }
            CircuitState::HalfOpen => self.try_half_open_slot(),
        }
    }

    fn try_half_open_slot(&self) -> bool {
        self.half_open_admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |admitted| {
                (admitted < self.config.half_open_max_calls).then_some(admitted + 1)
            })
            .is_ok()
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.half_open_max_calls
                    && self
                        .state
                        .compare_exchange(
                            CircuitState::HalfOpen as u8,
                            CircuitState::Closed as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.failure_count.store(0, Ordering::Release);
                    self.half_open_admitted.store(0, Ordering::Release);
                    self.half_open_successes.store(0, Ordering::Release);
                    tracing::info!("circuit breaker closed after recovery");
                }
            }
            CircuitState::Open => {
                // Late success from a call admitted before the trip.
                self.failure_count.store(0, Ordering::Release);
            }
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        self.last_failure_ms.store(self.now_ms(), Ordering::Release);

        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold
                    && self
                        .state
                        .compare_exchange(
                            CircuitState::Closed as u8,
                            CircuitState::Open as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    tracing::warn!(failures, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                if self
                    .state
                    .compare_exchange(
                        CircuitState::HalfOpen as u8,
                        CircuitState::Open as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.half_open_admitted.store(0, Ordering::Release);
                    self.half_open_successes.store(0, Ordering::Release);
                    tracing::warn!("circuit breaker reopened after half-open failure");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Forces the breaker back to Closed. Intended for tests and manual
    /// operator intervention.
    pub fn reset(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.half_open_admitted.store(0, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Process-wide registry of breakers keyed by service name.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    /// Creates a manager; every service gets a breaker with `config`.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Gets or creates the breaker for `service`.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(service) {
            return breaker.clone();
        }
        self.breakers
            .entry(service.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .clone()
    }

    /// Admission check that surfaces [`CircuitOpen`] on rejection.
    pub fn allow(&self, service: &str) -> Result<(), CircuitOpen> {
        if self.breaker(service).allow_request() {
            Ok(())
        } else {
            Err(CircuitOpen {
                service: service.to_owned(),
            })
        }
    }

    /// Records the outcome of a call against the service's breaker.
    pub fn record(&self, service: &str, success: bool) {
        let breaker = self.breaker(service);
        if success {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
    }

    /// `(service, state, failure_count)` snapshot for reporting.
    #[must_use]
    pub fn states(&self) -> Vec<(String, CircuitState, u32)> {
        self.breakers
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().state(),
                    entry.value().failure_count(),
                )
            })
            .collect()
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
