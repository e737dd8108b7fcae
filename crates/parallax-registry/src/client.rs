//! Service registration and discovery clients.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parallax_common::balance::LoadBalancer;
use parallax_common::Endpoint;
use parallax_proto::RpcRequest;
use tokio_util::sync::CancellationToken;

use crate::error::{RegistryError, Result, StoreError};
use crate::store::{CoordinationStore, SessionId};

/// Root of the registration namespace.
pub const BASE_PATH: &str = "/rpc-services";

/// Retry schedule for store operations.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry; doubles per attempt.
    pub initial_delay: Duration,
    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

async fn with_backoff<T, F, Fut>(backoff: &BackoffConfig, mut op: F) -> std::result::Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, StoreError>>,
{
    let mut delay = backoff.initial_delay;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;
                if attempt >= backoff.max_attempts {
                    return Err(error);
                }
                tracing::warn!(attempt, ?delay, %error, "store operation failed, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}

fn service_path(service: &str) -> String {
    format!("{BASE_PATH}/{service}")
}

/// Registers this process's endpoints as ephemeral nodes.
pub struct ServiceRegistry {
    store: Arc<dyn CoordinationStore>,
    backoff: BackoffConfig,
    session: tokio::sync::Mutex<Option<SessionId>>,
    /// `(service, endpoint)` → created node path, for unregistration.
    registered: DashMap<(String, String), String>,
}

impl ServiceRegistry {
    /// Creates a registry client over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self::with_backoff(store, BackoffConfig::default())
    }

    /// Creates a registry client with an explicit retry schedule.
    #[must_use]
    pub fn with_backoff(store: Arc<dyn CoordinationStore>, backoff: BackoffConfig) -> Self {
        Self {
            store,
            backoff,
            session: tokio::sync::Mutex::new(None),
            registered: DashMap::new(),
        }
    }

    async fn session(&self) -> std::result::Result<SessionId, StoreError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = *guard {
            return Ok(session);
        }
        let session = with_backoff(&self.backoff, || self.store.connect()).await?;
        *guard = Some(session);
        Ok(session)
    }

    /// Registers `endpoint` under `service`.
    ///
    /// Creates the persistent service node if absent, then an ephemeral
    /// sequential child whose body is `host:port`. The coordination service
    /// removes the child when this client's session ends.
    pub async fn register(&self, service: &str, endpoint: &Endpoint) -> Result<()> {
        let session = self.session().await?;
        let parent = service_path(service);

        self.store.ensure_node(BASE_PATH).await?;
        self.store.ensure_node(&parent).await?;
        let path = self
            .store
            .create_ephemeral_sequential(session, &parent, &endpoint.to_string())
            .await?;

        tracing::info!(service, %endpoint, path, "registered service endpoint");
        self.registered
            .insert((service.to_owned(), endpoint.to_string()), path);
        Ok(())
    }

    /// Removes a previously registered endpoint.
    pub async fn unregister(&self, service: &str, endpoint: &Endpoint) -> Result<()> {
        let key = (service.to_owned(), endpoint.to_string());
        if let Some((_, path)) = self.registered.remove(&key) {
            self.store.delete(&path).await?;
            tracing::info!(service, %endpoint, "unregistered service endpoint");
        }
        Ok(())
    }

    /// Ends the session; the store drops all this client's registrations.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            self.store.close_session(session).await?;
        }
        self.registered.clear();
        Ok(())
    }
}

/// Discovers endpoints with a watch-maintained cache.
pub struct ServiceDiscovery {
    store: Arc<dyn CoordinationStore>,
    balancer: Arc<dyn LoadBalancer>,
    backoff: BackoffConfig,
    /// Service → current endpoint list. Whole-list replacement keeps
    /// readers free of partial states; the map is shared with the watch
    /// tasks that refresh it.
    cache: Arc<DashMap<String, Arc<Vec<Endpoint>>>>,
    watched: DashMap<String, ()>,
    cancel: CancellationToken,
}

impl ServiceDiscovery {
    /// Creates a discovery client selecting through `balancer`.
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>, balancer: Arc<dyn LoadBalancer>) -> Self {
        Self::with_backoff(store, balancer, BackoffConfig::default())
    }

    /// Creates a discovery client with an explicit retry schedule.
    #[must_use]
    pub fn with_backoff(
        store: Arc<dyn CoordinationStore>,
        balancer: Arc<dyn LoadBalancer>,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            store,
            balancer,
            backoff,
            cache: Arc::new(DashMap::new()),
            watched: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Current endpoints of `service`.
    ///
    /// The first lookup reads the store and installs a child watch; later
    /// lookups serve from the cache the watch keeps current.
    pub async fn lookup(&self, service: &str) -> Result<Arc<Vec<Endpoint>>> {
        if let Some(cached) = self.cache.get(service) {
            return Ok(cached.clone());
        }

        let parent = service_path(service);
        let data = with_backoff(&self.backoff, || self.store.children_data(&parent)).await;
        let data = match data {
            Ok(data) => data,
            Err(StoreError::NodeNotFound(_)) => Vec::new(),
            Err(error) => return Err(error.into()),
        };

        let mut endpoints = Vec::with_capacity(data.len());
        for body in data {
            let endpoint = Endpoint::from_str(&body).map_err(|_| {
                RegistryError::InvalidEndpointData {
                    service: service.to_owned(),
                    data: body.clone(),
                }
            })?;
            endpoints.push(endpoint);
        }

        let endpoints = Arc::new(endpoints);
        self.cache.insert(service.to_owned(), endpoints.clone());
        self.install_watch(service).await?;
        Ok(endpoints)
    }

    async fn install_watch(&self, service: &str) -> Result<()> {
        if self.watched.insert(service.to_owned(), ()).is_some() {
            return Ok(());
        }

        let parent = service_path(service);
        self.store.ensure_node(BASE_PATH).await?;
        self.store.ensure_node(&parent).await?;
        let mut watch = self.store.watch_children(&parent).await?;

        let store = self.store.clone();
        let cache_service = service.to_owned();
        let cache = self.cache.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = watch.recv() => {
                        if event.is_none() {
                            tracing::debug!(service = %cache_service, "child watch closed");
                            break;
                        }
                        match store.children_data(&parent).await {
                            Ok(data) => {
                                let endpoints: Vec<Endpoint> = data
                                    .iter()
                                    .filter_map(|body| match Endpoint::from_str(body) {
                                        Ok(endpoint) => Some(endpoint),
                                        Err(_) => {
                                            tracing::warn!(
                                                service = %cache_service,
                                                data = %body,
                                                "ignoring malformed endpoint data"
                                            );
                                            None
                                        }
                                    })
                                    .collect();
                                tracing::debug!(
                                    service = %cache_service,
                                    endpoints = endpoints.len(),
                                    "service endpoints refreshed"
                                );
                                cache.insert(cache_service.clone(), Arc::new(endpoints));
                            }
                            Err(error) => {
                                tracing::warn!(service = %cache_service, %error, "failed to reread children");
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Selects an endpoint for `request` through the configured balancer.
    pub async fn select_endpoint(&self, request: &RpcRequest) -> Result<Endpoint> {
        let service = request.service_key();
        let endpoints = self.lookup(&service).await?;
        self.balancer
            .select(&endpoints, request)
            .cloned()
            .ok_or(RegistryError::NoEndpoints(service))
    }

    /// Stops all watch tasks.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ServiceDiscovery {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
