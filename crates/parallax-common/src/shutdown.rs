//! Graceful shutdown hooks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Default global grace period.
const DEFAULT_GRACE: Duration = Duration::from_secs(30);

/// A unit of teardown work.
#[async_trait]
pub trait ShutdownHook: Send + Sync {
    /// Hook name for logs.
    fn name(&self) -> &str;

    /// Execution order; smaller runs earlier.
    fn priority(&self) -> i32 {
        100
    }

    /// Per-hook timeout; `None` shares the global grace period.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Hooks can opt out at shutdown time.
    fn should_execute(&self) -> bool {
        true
    }

    /// Performs the teardown.
    async fn shutdown(&self);
}

/// Runs registered hooks in priority order on termination.
///
/// Each hook executes on its own task; the manager waits for it up to the
/// hook's timeout, bounded by the time left in the global grace period.
/// `shutdown` is idempotent; only the first caller runs the hooks.
pub struct ShutdownManager {
    hooks: Mutex<Vec<Arc<dyn ShutdownHook>>>,
    grace: Duration,
    executed: AtomicBool,
    sentinel_installed: AtomicBool,
}

impl ShutdownManager {
    /// Creates a manager with the default 30-second grace period.
    #[must_use]
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_GRACE)
    }

    /// Creates a manager with an explicit grace period.
    #[must_use]
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
            grace,
            executed: AtomicBool::new(false),
            sentinel_installed: AtomicBool::new(false),
        }
    }

    /// Registers a hook.
    pub fn register(&self, hook: Arc<dyn ShutdownHook>) {
        if let Ok(mut hooks) = self.hooks.lock() {
            tracing::debug!(hook = hook.name(), priority = hook.priority(), "registered shutdown hook");
            hooks.push(hook);
        }
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.lock().map(|hooks| hooks.len()).unwrap_or(0)
    }

    /// True when no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_ordered_hooks(&self) -> Vec<Arc<dyn ShutdownHook>> {
        let mut hooks = self
            .hooks
            .lock()
            .map(|hooks| hooks.clone())
            .unwrap_or_default();
        hooks.sort_by_key(|hook| hook.priority());
        hooks
    }

    /// Runs all hooks in priority order, bounded by the grace period.
    ///
    /// Returns `false` when a previous call already ran the hooks.
    pub async fn shutdown(&self) -> bool {
        if self.executed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let deadline = Instant::now() + self.grace;
        for hook in self.take_ordered_hooks() {
            if !hook.should_execute() {
                tracing::debug!(hook = hook.name(), "shutdown hook skipped");
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(hook = hook.name(), "grace period exhausted, skipping hook");
                continue;
            }

            let budget = hook.timeout().map_or(remaining, |t| t.min(remaining));
            let name = hook.name().to_owned();
            let task = tokio::spawn({
                let hook = hook.clone();
                async move { hook.shutdown().await }
            });

            match tokio::time::timeout(budget, task).await {
                Ok(Ok(())) => tracing::info!(hook = %name, "shutdown hook finished"),
                Ok(Err(e)) => tracing::error!(hook = %name, error = %e, "shutdown hook panicked"),
                Err(_) => tracing::warn!(hook = %name, "shutdown hook timed out"),
            }
        }

        true
    }

    /// Runs all hooks inline with no timeout. For abnormal termination.
    pub async fn force_shutdown(&self) {
        self.executed.store(true, Ordering::Release);
        for hook in self.take_ordered_hooks() {
            if hook.should_execute() {
                hook.shutdown().await;
            }
        }
    }

    /// Installs the process signal sentinel at most once.
    ///
    /// The sentinel waits for ctrl-c and then runs `shutdown`.
    pub fn install_sentinel(self: &Arc<Self>) -> bool {
        if self.sentinel_installed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            tracing::info!("shutdown signal received");
            manager.shutdown().await;
        });
        true
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
