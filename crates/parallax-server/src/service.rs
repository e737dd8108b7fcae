//! Service definitions and method dispatch.
//!
//! A service is a name → handler map built at registration; dispatch is an
//! explicit map lookup. Handlers are async and receive the full request,
//! returning either a result value or a business error.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parallax_proto::{service_key, RpcRequest, Value};

/// A business failure raised by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    /// Human-readable failure description.
    pub message: String,
    /// Machine-readable code carried in the response extensions.
    pub code: String,
}

impl HandlerError {
    /// Creates a business error with the default code.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: "BUSINESS_ERROR".to_owned(),
        }
    }

    /// Creates a business error with an explicit code.
    #[must_use]
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for HandlerError {}

/// Handler outcome.
pub type HandlerResult = std::result::Result<Value, HandlerError>;

type BoxedFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
type BoxedHandler = Arc<dyn Fn(RpcRequest) -> BoxedFuture + Send + Sync>;

/// A registered service: identity plus its method table.
pub struct RpcService {
    interface: String,
    group: String,
    version: String,
    handlers: HashMap<String, BoxedHandler>,
}

impl RpcService {
    /// Starts a service definition for `interface`.
    #[must_use]
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            group: String::new(),
            version: String::new(),
            handlers: HashMap::new(),
        }
    }

    /// Sets the group tag.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Sets the version tag.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Registers an async handler for `method`.
    #[must_use]
    pub fn method<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RpcRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers
            .insert(method.into(), Arc::new(move |request| Box::pin(handler(request))));
        self
    }

    /// The composite identity `interface#group#version`.
    #[must_use]
    pub fn key(&self) -> String {
        service_key(&self.interface, &self.group, &self.version)
    }

    /// The interface name.
    #[must_use]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Registered method names.
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Looks up and invokes the handler for `request.method`.
    ///
    /// Returns `None` when the method is not registered.
    pub fn dispatch(&self, request: RpcRequest) -> Option<BoxedFuture> {
        self.handlers
            .get(&request.method)
            .map(|handler| handler(request))
    }
}

impl std::fmt::Debug for RpcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcService")
            .field("key", &self.key())
            .field("methods", &self.handlers.len())
            .finish()
    }
}
