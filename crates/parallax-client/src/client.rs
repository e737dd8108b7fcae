//! The RPC client: call pipeline over discovery, breaker, retry, pool,
//! and the pending-request multiplexer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parallax_common::breaker::{CircuitBreakerConfig, CircuitBreakerManager};
use parallax_common::codecs;
use parallax_common::config::RpcConfig;
use parallax_common::metrics::MetricsRegistry;
use parallax_common::retry::{DefaultRetryPolicy, RetryPolicy};
use parallax_common::trace::TraceManager;
use parallax_proto::compress::Compressor;
use parallax_proto::serialize::Serializer;
use parallax_proto::{encode_request, RpcRequest, RpcResponse};
use parallax_registry::{CoordinationStore, ServiceDiscovery};
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};
use crate::multiplex::PendingMap;
use crate::pool::{OverallConnectionStats, PoolManager};

/// Multiplexing RPC client.
///
/// One client instance owns a request-ID allocator, a pending-request map
/// shared by every pooled connection's reader, per-endpoint pools, and the
/// background timeout sweeper. Calls flow: trace start → breaker admission
/// → retry loop over [select endpoint → encode → acquire → write → await]
/// → metrics and trace end.
pub struct RpcClient {
    config: RpcConfig,
    serializer: Arc<dyn Serializer>,
    compressor: Arc<dyn Compressor>,
    discovery: ServiceDiscovery,
    pools: PoolManager,
    pending: Arc<PendingMap>,
    request_ids: AtomicU64,
    breakers: CircuitBreakerManager,
    retry: Arc<dyn RetryPolicy>,
    metrics: Arc<MetricsRegistry>,
    tracer: Arc<TraceManager>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl RpcClient {
    /// Creates a client over `store` using the extension names from
    /// `config` for its serializer, compressor, and balancer.
    pub fn new(config: RpcConfig, store: Arc<dyn CoordinationStore>) -> Result<Self> {
        let serializer = codecs::serializer_loader()
            .get(&config.client.serializer)
            .map_err(|e| ClientError::Configuration(e.to_string()))?;
        let compressor = codecs::compressor_loader()
            .get(&config.client.compressor)
            .map_err(|e| ClientError::Configuration(e.to_string()))?;
        let balancer = parallax_common::balance::loader()
            .get(&config.client.balancer)
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        let pending = Arc::new(PendingMap::new());
        let cancel = CancellationToken::new();
        pending.spawn_sweeper(
            config.client.timeout_check_interval,
            config.client.request_timeout,
            cancel.clone(),
        );

        let breakers = CircuitBreakerManager::new(CircuitBreakerConfig {
            failure_threshold: config.breaker.failure_threshold,
            recovery_timeout: config.breaker.recovery_timeout,
            half_open_max_calls: config.breaker.half_open_max_calls,
        });

        let metrics = Arc::new(MetricsRegistry::new());
        if config.metrics.report_enabled {
            metrics.spawn_reporter(config.metrics.report_interval, cancel.clone());
        }

        let pools = PoolManager::new(
            config.pool.clone(),
            pending.clone(),
            config.server.max_frame_size,
        );

        Ok(Self {
            discovery: ServiceDiscovery::new(store, balancer),
            pools,
            pending,
            request_ids: AtomicU64::new(0),
            breakers,
            retry: Arc::new(DefaultRetryPolicy::default()),
            metrics,
            tracer: Arc::new(TraceManager::new()),
            cancel,
            closed: AtomicBool::new(false),
            serializer,
            compressor,
            config,
        })
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the trace manager, e.g. to share one across clients.
    #[must_use]
    pub fn with_tracer(mut self, tracer: Arc<TraceManager>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Invokes `request` and awaits the response.
    pub async fn call(&self, request: RpcRequest) -> Result<RpcResponse> {
        self.call_with_timeout(request, self.config.client.request_timeout)
            .await
    }

    /// Invokes `request` with an explicit per-call deadline.
    pub async fn call_with_timeout(
        &self,
        request: RpcRequest,
        timeout: Duration,
    ) -> Result<RpcResponse> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::PoolClosed);
        }

        let service = request.service_key();
        self.tracer.start_trace(&service, &request.method);
        let started = Instant::now();

        let mut attempt: u32 = 0;
        let result = loop {
            match self.attempt_call(&request, timeout).await {
                Ok(response) => break Ok(response),
                Err(error) => {
                    if self.retry.should_retry(attempt, &error) {
                        let delay = self.retry.retry_delay(attempt);
                        tracing::debug!(
                            service = %service,
                            method = %request.method,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    break Err(error);
                }
            }
        };

        let elapsed = started.elapsed();
        match &result {
            Ok(response) => {
                if response.is_success() {
                    self.metrics.record_success(&service, &request.method, elapsed);
                    self.tracer.finish_trace();
                } else {
                    self.metrics.record_failure(&service, &request.method, elapsed);
                    self.tracer.finish_trace_with_error(&response.message);
                }
            }
            Err(error) => {
                self.metrics.record_failure(&service, &request.method, elapsed);
                self.tracer.finish_trace_with_error(&error.to_string());
            }
        }

        result
    }

    /// One attempt through admission, encode, write, and await.
    async fn attempt_call(&self, request: &RpcRequest, timeout: Duration) -> Result<RpcResponse> {
        let service = request.service_key();
        self.breakers.allow(&service)?;

        let outcome = self.dispatch_once(request, timeout).await;
        // Transport-level failures count against the breaker; a delivered
        // response means the service is reachable whatever its code.
        self.breakers.record(&service, outcome.is_ok());
        outcome
    }

    async fn dispatch_once(&self, request: &RpcRequest, timeout: Duration) -> Result<RpcResponse> {
        let endpoint = self.discovery.select_endpoint(request).await?;

        let request_id = self.request_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let receiver = self.pending.register(request_id);

        let frame = match encode_request(
            self.serializer.as_ref(),
            self.compressor.as_ref(),
            request_id,
            request,
        ) {
            Ok(frame) => frame,
            Err(error) => {
                self.pending.cancel(request_id);
                return Err(error.into());
            }
        };

        let pool = self.pools.pool(&endpoint);
        let connection = match pool.acquire().await {
            Ok(connection) => connection,
            Err(error) => {
                self.pending.cancel(request_id);
                return Err(error);
            }
        };

        let write_result = connection.send_frame(&frame).await;
        pool.release(connection, write_result.is_ok()).await;
        if let Err(error) = write_result {
            self.pending.cancel(request_id);
            return Err(error);
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Cancelled),
            Err(_) => {
                // Local deadline fired before the sweeper; drop the entry
                // so a late response is discarded.
                self.pending.cancel(request_id);
                Err(ClientError::RequestTimeout(request_id))
            }
        }
    }

    /// Number of requests currently awaiting responses.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Configured bound on in-flight requests, used by the async facade.
    #[must_use]
    pub fn max_pending_requests(&self) -> usize {
        self.config.client.max_pending_requests
    }

    /// Connection statistics across endpoint pools.
    #[must_use]
    pub fn connection_stats(&self) -> OverallConnectionStats {
        self.pools.overall_stats()
    }

    /// The client's metrics registry.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// The client's trace manager.
    #[must_use]
    pub fn tracer(&self) -> &Arc<TraceManager> {
        &self.tracer
    }

    /// The client's circuit breaker manager.
    #[must_use]
    pub fn breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    /// Closes the client: stops background tasks, closes pools, fails all
    /// in-flight calls. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        self.pools.close_all().await;
        self.pending.fail_all(|_| ClientError::Cancelled);
        self.discovery.close();
        tracing::info!("rpc client closed");
    }
}
