//! Request and response payload types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Response status: success.
pub const STATUS_OK: u16 = 200;
/// Response status: authentication failed.
pub const STATUS_UNAUTHENTICATED: u16 = 401;
/// Response status: rate limited.
pub const STATUS_RATE_LIMITED: u16 = 429;
/// Response status: server-side failure.
pub const STATUS_FAILURE: u16 = 500;

/// Extension key carrying a machine-readable error code on failures.
pub const EXT_ERROR_CODE: &str = "error_code";
/// Extension key carrying a retry-after hint in milliseconds.
pub const EXT_RETRY_AFTER_MS: &str = "retry_after_ms";

/// An RPC request payload.
///
/// The composite service identity used for registration, discovery, and
/// dispatch is `interface#group#version`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RpcRequest {
    /// Service interface name.
    pub interface: String,

    /// Method name within the interface.
    pub method: String,

    /// Parameter type descriptors, parallel to `params`.
    #[serde(default)]
    pub param_types: Vec<String>,

    /// Parameter values.
    #[serde(default)]
    pub params: Vec<Value>,

    /// Service version tag.
    #[serde(default)]
    pub version: String,

    /// Service group tag.
    #[serde(default)]
    pub group: String,

    /// Authentication token, if the caller presents one.
    #[serde(default)]
    pub token: Option<String>,

    /// Caller address, populated by the server on receipt.
    #[serde(default)]
    pub client_addr: Option<String>,

    /// Client-side send timestamp, milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp_ms: u64,

    /// Interceptor scratch space. Never serialized.
    #[serde(skip)]
    pub attributes: BTreeMap<String, String>,
}

impl RpcRequest {
    /// Creates a request for `interface.method` with the given parameters.
    #[must_use]
    pub fn new(interface: impl Into<String>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            interface: interface.into(),
            method: method.into(),
            params,
            timestamp_ms: now_millis(),
            ..Self::default()
        }
    }

    /// Sets the service version tag.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the service group tag.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Sets the authentication token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// The composite service identity `interface#group#version`.
    #[must_use]
    pub fn service_key(&self) -> String {
        format!("{}#{}#{}", self.interface, self.group, self.version)
    }

    /// The composite method identity `service#method` used by rate limiting.
    #[must_use]
    pub fn method_key(&self) -> String {
        format!("{}#{}", self.interface, self.method)
    }
}

/// An RPC response payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RpcResponse {
    /// Status code (`STATUS_OK`, `STATUS_UNAUTHENTICATED`, ...).
    pub code: u16,

    /// Human-readable status message.
    #[serde(default)]
    pub message: String,

    /// Result payload, absent on failure.
    #[serde(default)]
    pub payload: Option<Value>,

    /// String-keyed extensions carrying error codes and retry hints.
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
}

impl RpcResponse {
    /// A successful response carrying `payload`.
    #[must_use]
    pub fn success(payload: Value) -> Self {
        Self {
            code: STATUS_OK,
            message: "OK".to_owned(),
            payload: Some(payload),
            extensions: BTreeMap::new(),
        }
    }

    /// A failure response with the given status code and message.
    #[must_use]
    pub fn failure(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            payload: None,
            extensions: BTreeMap::new(),
        }
    }

    /// Adds an extension entry.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// True when the status code signals success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == STATUS_OK
    }
}

impl Default for RpcResponse {
    fn default() -> Self {
        Self {
            code: STATUS_OK,
            message: String::new(),
            payload: None,
            extensions: BTreeMap::new(),
        }
    }
}

/// Builds the composite service identity from its parts.
#[must_use]
pub fn service_key(interface: &str, group: &str, version: &str) -> String {
    format!("{interface}#{group}#{version}")
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
