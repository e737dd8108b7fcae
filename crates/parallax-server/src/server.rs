//! Framed TCP server.
//!
//! Per connection: reframe the byte stream, decode requests, run the
//! interceptor chain, dispatch to the registered handler, and write the
//! response back with the request's own codec. Requests on one connection
//! process concurrently; responses go out whenever they finish and the
//! client correlates them by request ID.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parallax_common::config::RpcConfig;
use parallax_common::metrics::MetricsRegistry;
use parallax_common::ratelimit::{RateLimitAlgorithm, RateLimitConfig, RateLimitManager};
use parallax_common::security::AuthManager;
use parallax_common::trace::TraceManager;
use parallax_common::Endpoint;
use parallax_proto::{
    compress, encode_response, serialize, FrameDecoder, MessageType, RawFrame, RpcRequest,
    RpcResponse, EXT_ERROR_CODE, STATUS_FAILURE,
};
use parallax_registry::ServiceRegistry;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ServerError};
use crate::interceptor::{
    Interceptor, InterceptorChain, RateLimitInterceptor, SecurityInterceptor,
};
use crate::service::RpcService;

/// Interval of the auth-cache sweep.
const AUTH_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The RPC server.
pub struct RpcServer {
    config: RpcConfig,
    services: DashMap<String, Arc<RpcService>>,
    chain: InterceptorChain,
    auth: Arc<AuthManager>,
    limits: Arc<RateLimitManager>,
    metrics: Arc<MetricsRegistry>,
    tracer: Arc<TraceManager>,
    registry: Option<Arc<ServiceRegistry>>,
    cancel: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl RpcServer {
    /// Creates a server with the default interceptor chain: security
    /// first, then rate limiting.
    #[must_use]
    pub fn new(config: RpcConfig) -> Self {
        if config.security.enabled && config.security.secret.is_empty() {
            tracing::warn!("security enabled without a signing secret; signed tokens will not validate");
        }

        let auth = Arc::new(AuthManager::new(&config.security.secret));
        let algorithm = match config.rate_limit.algorithm.as_str() {
            "sliding_window" => RateLimitAlgorithm::SlidingWindow,
            _ => RateLimitAlgorithm::TokenBucket,
        };
        let limits = Arc::new(RateLimitManager::new(
            RateLimitConfig::per_second(config.rate_limit.rate, config.rate_limit.capacity),
            algorithm,
        ));

        let mut chain = InterceptorChain::new();
        let security = SecurityInterceptor::with_public_matcher(
            auth.clone(),
            parallax_common::security::PublicServiceMatcher::new(
                config.security.public_patterns.clone(),
            ),
        );
        chain.add(Arc::new(if config.security.enabled {
            security
        } else {
            security.disabled()
        }));
        let rate_limit = RateLimitInterceptor::new(limits.clone());
        chain.add(Arc::new(if config.rate_limit.enabled {
            rate_limit
        } else {
            rate_limit.disabled()
        }));

        Self {
            config,
            services: DashMap::new(),
            chain,
            auth,
            limits,
            metrics: Arc::new(MetricsRegistry::new()),
            tracer: Arc::new(TraceManager::new()),
            registry: None,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Adds a custom interceptor; position follows its priority.
    pub fn add_interceptor(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.chain.add(interceptor);
    }

    /// Attaches a registry client; `start` will register every service
    /// at the bound address and `shutdown` releases the registrations.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Registers a service under its `interface#group#version` key.
    pub fn register_service(&self, service: RpcService) {
        let key = service.key();
        tracing::info!(service = %key, methods = service.methods().len(), "service registered");
        self.services.insert(key, Arc::new(service));
    }

    /// The authentication manager, for issuing tokens and API keys.
    #[must_use]
    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// The rate limit manager, for per-key overrides and reports.
    #[must_use]
    pub fn rate_limits(&self) -> &Arc<RateLimitManager> {
        &self.limits
    }

    /// The server-side metrics registry.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Binds the listener and starts serving in the background.
    ///
    /// Returns the bound address (useful with a `:0` port).
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ServerError::InvalidAddress("server already started".to_owned()));
        }

        let address: SocketAddr = self
            .config
            .server
            .bind_address
            .parse()
            .map_err(|_| ServerError::InvalidAddress(self.config.server.bind_address.clone()))?;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::BindFailed {
                address: address.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        self.auth.spawn_sweeper(AUTH_SWEEP_INTERVAL, self.cancel.clone());
        if self.config.metrics.report_enabled {
            self.metrics
                .spawn_reporter(self.config.metrics.report_interval, self.cancel.clone());
        }

        if let Some(registry) = &self.registry {
            let endpoint = Endpoint::new(local_addr.ip().to_string(), local_addr.port());
            for entry in self.services.iter() {
                registry.register(entry.key(), &endpoint).await?;
            }
        }

        let server = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = server.cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((socket, peer)) => {
                            let server = Arc::clone(&server);
                            tokio::spawn(async move {
                                server.handle_connection(socket, peer).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        });

        tracing::info!(address = %local_addr, "rpc server listening");
        Ok(local_addr)
    }

    /// Stops accepting, releases registrations, cancels background tasks.
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        if let Some(registry) = &self.registry {
            if let Err(error) = registry.close().await {
                tracing::warn!(%error, "registry close failed");
            }
        }
        tracing::info!("rpc server stopped");
    }

    async fn handle_connection(self: &Arc<Self>, socket: TcpStream, peer: SocketAddr) {
        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!(error = %e, "set_nodelay failed");
        }
        let (mut read_half, write_half) = socket.into_split();
        let writer = Arc::new(Mutex::new(write_half));

        let mut decoder = FrameDecoder::with_max_frame_size(self.config.server.max_frame_size);
        let mut buf = vec![0u8; 8192];

        loop {
            let n = tokio::select! {
                () = self.cancel.cancelled() => return,
                read = read_half.read(&mut buf) => match read {
                    Ok(0) => return,
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!(%peer, error = %e, "connection read failed");
                        return;
                    }
                }
            };

            decoder.feed(&buf[..n]);
            loop {
                match decoder.try_next() {
                    Ok(Some(frame)) => self.handle_frame(frame, peer, &writer),
                    Ok(None) => break,
                    Err(e) => {
                        // Unknown magic or a broken length prefix means the
                        // stream can no longer be reframed: drop the peer.
                        tracing::warn!(%peer, error = %e, "protocol violation, closing connection");
                        let mut writer = writer.lock().await;
                        let _ = writer.shutdown().await;
                        return;
                    }
                }
            }
        }
    }

    fn handle_frame(self: &Arc<Self>, frame: RawFrame, peer: SocketAddr, writer: &Arc<Mutex<OwnedWriteHalf>>) {
        if frame.message_type != MessageType::Request {
            tracing::warn!(%peer, "ignoring non-request frame");
            return;
        }

        let server = Arc::clone(self);
        let writer = writer.clone();
        tokio::spawn(async move {
            let request_id = frame.request_id;
            let codec_tag = frame.codec_tag;
            let compress_tag = frame.compress_tag;

            let response = match frame.decode_request() {
                Ok(mut request) => {
                    request.client_addr = Some(peer.to_string());
                    server.process(request).await
                }
                Err(error) => {
                    tracing::warn!(%peer, request_id, %error, "request decode failed");
                    RpcResponse::failure(STATUS_FAILURE, format!("decode error: {error}"))
                        .with_extension(EXT_ERROR_CODE, "DECODE_ERROR")
                }
            };

            // Answer with the codec the caller spoke; the compressor's
            // threshold policy decides whether the reply is compressed.
            let serializer =
                serialize::by_tag(codec_tag).unwrap_or(&serialize::JsonSerializer);
            let compressor =
                compress::by_tag(compress_tag).unwrap_or(&compress::NoneCompressor);

            match encode_response(serializer, compressor, request_id, &response) {
                Ok(bytes) => {
                    let mut writer = writer.lock().await;
                    if let Err(e) = writer.write_all(&bytes).await {
                        tracing::debug!(%peer, error = %e, "response write failed");
                    } else if let Err(e) = writer.flush().await {
                        tracing::debug!(%peer, error = %e, "response flush failed");
                    }
                }
                Err(error) => {
                    tracing::error!(request_id, %error, "response encode failed");
                }
            }
        });
    }

    /// Runs one request through the interceptor chain and dispatch.
    async fn process(&self, mut request: RpcRequest) -> RpcResponse {
        let service_key = request.service_key();
        let method = request.method.clone();
        self.tracer.start_trace(&service_key, &method);
        let started = Instant::now();

        let mut response = RpcResponse::default();
        if !self.chain.pre_process(&mut request, &mut response) {
            self.metrics
                .record_failure(&service_key, &method, started.elapsed());
            self.tracer.finish_trace_with_error(&response.message);
            return response;
        }

        let response = match self.dispatch(&service_key, request.clone()).await {
            Dispatched::Ok(value) => RpcResponse::success(value),
            Dispatched::Business(error) => {
                let response = RpcResponse::failure(STATUS_FAILURE, error.message.clone())
                    .with_extension(EXT_ERROR_CODE, error.code.clone());
                self.chain
                    .on_exception(&request, &response, &error.to_string());
                response
            }
            Dispatched::ServiceNotFound => {
                tracing::warn!(service = %service_key, "service not found");
                RpcResponse::failure(STATUS_FAILURE, format!("service not found: {service_key}"))
                    .with_extension(EXT_ERROR_CODE, "SERVICE_NOT_FOUND")
            }
            Dispatched::MethodNotFound => {
                tracing::warn!(service = %service_key, method = %method, "method not found");
                RpcResponse::failure(
                    STATUS_FAILURE,
                    format!("method not found: {service_key}.{method}"),
                )
                .with_extension(EXT_ERROR_CODE, "METHOD_NOT_FOUND")
            }
        };

        self.chain.post_process(&request, &response);

        let elapsed = started.elapsed();
        if response.is_success() {
            self.metrics.record_success(&service_key, &method, elapsed);
            self.tracer.finish_trace();
        } else {
            self.metrics.record_failure(&service_key, &method, elapsed);
            self.tracer.finish_trace_with_error(&response.message);
        }
        response
    }

    async fn dispatch(&self, service_key: &str, request: RpcRequest) -> Dispatched {
        let Some(service) = self.services.get(service_key).map(|s| s.clone()) else {
            return Dispatched::ServiceNotFound;
        };
        match service.dispatch(request) {
            Some(invocation) => match invocation.await {
                Ok(value) => Dispatched::Ok(value),
                Err(error) => Dispatched::Business(error),
            },
            None => Dispatched::MethodNotFound,
        }
    }
}

enum Dispatched {
    Ok(parallax_proto::Value),
    Business(crate::service::HandlerError),
    ServiceNotFound,
    MethodNotFound,
}
