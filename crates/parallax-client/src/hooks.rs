//! Shutdown hooks for client-owned resources.

use std::sync::Arc;

use async_trait::async_trait;
use parallax_common::metrics::MetricsRegistry;
use parallax_common::shutdown::ShutdownHook;

use crate::client::RpcClient;

/// Closes the client (pools, sweeper, in-flight calls) on shutdown.
pub struct ClientShutdownHook {
    client: Arc<RpcClient>,
}

impl ClientShutdownHook {
    /// Creates a hook closing `client`.
    #[must_use]
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ShutdownHook for ClientShutdownHook {
    fn name(&self) -> &str {
        "rpc-client"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn shutdown(&self) {
        self.client.close().await;
    }
}

/// Logs a final metrics report before the process exits.
pub struct MetricsReportHook {
    metrics: Arc<MetricsRegistry>,
}

impl MetricsReportHook {
    /// Creates a hook reporting from `metrics`.
    #[must_use]
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl ShutdownHook for MetricsReportHook {
    fn name(&self) -> &str {
        "metrics-final-report"
    }

    // Late: runs after traffic-bearing resources have closed.
    fn priority(&self) -> i32 {
        90
    }

    async fn shutdown(&self) {
        for snapshot in self.metrics.all_snapshots() {
            tracing::info!(
                service = %snapshot.service,
                total = snapshot.total,
                success = snapshot.success,
                failed = snapshot.failed,
                p95_ms = snapshot.p95_ms,
                p99_ms = snapshot.p99_ms,
                "final metrics report"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use parallax_common::config::RpcConfig;
    use parallax_common::shutdown::ShutdownManager;
    use parallax_registry::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn hooks_run_in_registration_priority_order() {
        let client =
            Arc::new(RpcClient::new(RpcConfig::default(), Arc::new(MemoryStore::new())).unwrap());
        let manager = ShutdownManager::new();

        manager.register(Arc::new(MetricsReportHook::new(client.metrics().clone())));
        manager.register(Arc::new(ClientShutdownHook::new(client.clone())));

        assert!(manager.shutdown().await);
        // Client is closed after the hook ran.
        assert!(client
            .call(parallax_proto::RpcRequest::new("svc", "m", vec![]))
            .await
            .is_err());
    }
}
