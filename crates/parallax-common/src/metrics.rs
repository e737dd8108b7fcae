//! Request metrics: counters, latency percentiles, periodic reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Cap on retained latency samples per service.
const MAX_SAMPLES: usize = 10_000;

/// Immutable metrics snapshot for one method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSnapshot {
    /// Method name.
    pub method: String,
    /// Total calls.
    pub total: u64,
    /// Successful calls.
    pub success: u64,
    /// Failed calls.
    pub failed: u64,
    /// Minimum response time, `None` before the first sample.
    pub min_ms: Option<u64>,
    /// Maximum response time.
    pub max_ms: Option<u64>,
}

/// Immutable metrics snapshot for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Service name.
    pub service: String,
    /// Total calls.
    pub total: u64,
    /// Successful calls.
    pub success: u64,
    /// Failed calls.
    pub failed: u64,
    /// Mean response time.
    pub avg_ms: f64,
    /// Minimum response time, `None` before the first sample.
    pub min_ms: Option<u64>,
    /// Maximum response time.
    pub max_ms: Option<u64>,
    /// 95th percentile of retained samples.
    pub p95_ms: u64,
    /// 99th percentile of retained samples.
    pub p99_ms: u64,
    /// Calls per second since the first sample.
    pub qps: f64,
    /// Per-method breakdown, sorted by method name.
    pub methods: Vec<MethodSnapshot>,
}

#[derive(Debug, Default)]
struct MethodMetrics {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl MethodMetrics {
    fn new() -> Self {
        Self {
            min_ms: AtomicU64::new(u64::MAX),
            ..Self::default()
        }
    }

    fn record(&self, duration_ms: u64, success: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.min_ms.fetch_min(duration_ms, Ordering::Relaxed);
        self.max_ms.fetch_max(duration_ms, Ordering::Relaxed);
    }

    fn snapshot(&self, method: &str) -> MethodSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let min = self.min_ms.load(Ordering::Relaxed);
        MethodSnapshot {
            method: method.to_owned(),
            total,
            success: self.success.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            min_ms: (min != u64::MAX).then_some(min),
            max_ms: (total > 0).then(|| self.max_ms.load(Ordering::Relaxed)),
        }
    }
}

/// Live metrics for one service.
#[derive(Debug)]
pub struct ServiceMetrics {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    sum_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
    /// Milliseconds since epoch of the first and most recent samples.
    first_sample_ms: AtomicU64,
    last_sample_ms: AtomicU64,
    /// Bounded ring of recent response times for percentile estimates.
    samples: Mutex<Vec<u64>>,
    methods: DashMap<String, Arc<MethodMetrics>>,
}

impl ServiceMetrics {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
            first_sample_ms: AtomicU64::new(0),
            last_sample_ms: AtomicU64::new(0),
            samples: Mutex::new(Vec::new()),
            methods: DashMap::new(),
        }
    }

    fn record(&self, method: &str, duration_ms: u64, success: bool) {
        let now = parallax_proto::now_millis();
        let _ = self
            .first_sample_ms
            .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire);
        self.last_sample_ms.store(now, Ordering::Relaxed);

        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.min_ms.fetch_min(duration_ms, Ordering::Relaxed);
        self.max_ms.fetch_max(duration_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.samples.lock() {
            if samples.len() >= MAX_SAMPLES {
                // Drop the older half so percentiles stay recent-biased.
                let half = samples.len() / 2;
                samples.drain(..half);
            }
            samples.push(duration_ms);
        }

        self.methods
            .entry(method.to_owned())
            .or_insert_with(|| Arc::new(MethodMetrics::new()))
            .record(duration_ms, success);
    }

    fn percentile(samples: &[u64], percentile: u8) -> u64 {
        if samples.is_empty() {
            return 0;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let rank = (f64::from(percentile) / 100.0 * sorted.len() as f64).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }

    fn snapshot(&self, service: &str) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let sum = self.sum_ms.load(Ordering::Relaxed);
        let min = self.min_ms.load(Ordering::Relaxed);

        let (p95, p99) = match self.samples.lock() {
            Ok(samples) => (
                Self::percentile(&samples, 95),
                Self::percentile(&samples, 99),
            ),
            Err(_) => (0, 0),
        };

        let first = self.first_sample_ms.load(Ordering::Relaxed);
        let qps = if total == 0 || first == 0 {
            0.0
        } else {
            let elapsed_ms = parallax_proto::now_millis().saturating_sub(first).max(1);
            total as f64 * 1000.0 / elapsed_ms as f64
        };

        let mut methods: Vec<MethodSnapshot> = self
            .methods
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        methods.sort_by(|a, b| a.method.cmp(&b.method));

        MetricsSnapshot {
            service: service.to_owned(),
            total,
            success: self.success.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            avg_ms: if total == 0 { 0.0 } else { sum as f64 / total as f64 },
            min_ms: (min != u64::MAX).then_some(min),
            max_ms: (total > 0).then(|| self.max_ms.load(Ordering::Relaxed)),
            p95_ms: p95,
            p99_ms: p99,
            qps,
            methods,
        }
    }
}

/// Process-wide metrics registry keyed by service name.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    services: DashMap<String, Arc<ServiceMetrics>>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn service(&self, service: &str) -> Arc<ServiceMetrics> {
        if let Some(metrics) = self.services.get(service) {
            return metrics.clone();
        }
        self.services
            .entry(service.to_owned())
            .or_insert_with(|| Arc::new(ServiceMetrics::new()))
            .clone()
    }

    /// Records a successful call.
    pub fn record_success(&self, service: &str, method: &str, duration: Duration) {
        self.service(service)
            .record(method, duration.as_millis() as u64, true);
    }

    /// Records a failed call.
    pub fn record_failure(&self, service: &str, method: &str, duration: Duration) {
        self.service(service)
            .record(method, duration.as_millis() as u64, false);
    }

    /// Snapshot for one service; zeroed when the service is unknown.
    #[must_use]
    pub fn snapshot(&self, service: &str) -> MetricsSnapshot {
        self.service(service).snapshot(service)
    }

    /// Snapshots for every recorded service, sorted by name.
    #[must_use]
    pub fn all_snapshots(&self) -> Vec<MetricsSnapshot> {
        let mut snapshots: Vec<MetricsSnapshot> = self
            .services
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }

    /// Drops all recorded state.
    pub fn reset(&self) {
        self.services.clear();
    }

    /// Spawns the periodic reporter. Disabled unless explicitly started.
    pub fn spawn_reporter(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for snapshot in registry.all_snapshots() {
                            tracing::info!(
                                service = %snapshot.service,
                                total = snapshot.total,
                                success = snapshot.success,
                                failed = snapshot.failed,
                                avg_ms = format!("{:.1}", snapshot.avg_ms),
                                p95_ms = snapshot.p95_ms,
                                p99_ms = snapshot.p99_ms,
                                qps = format!("{:.1}", snapshot.qps),
                                "metrics report"
                            );
                        }
                    }
                }
            }
        })
    }
}
