//! Framework configuration with layered loading and environment variable
//! interpolation.
//!
//! Settings load from a TOML file, `${VAR}` references inside string values
//! resolve against the environment, and `PARALLAX_`-prefixed environment
//! variables override file settings (`PARALLAX_CLIENT__REQUEST_TIMEOUT=10s`).

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Format, Toml},
    value::{Dict, Map, Value},
    Error as FigmentError, Figment, Metadata, Profile, Provider,
};
use serde::Deserialize;
use thiserror::Error;

/// Errors loading or parsing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error from the Figment configuration library.
    #[error("configuration error: {0}")]
    Figment(Box<FigmentError>),

    /// The specified configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<FigmentError> for ConfigError {
    fn from(err: FigmentError) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Top-level framework configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcConfig {
    /// Client-side call pipeline settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Per-endpoint connection pool settings.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication settings.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Rate limiting defaults.
    #[serde(default)]
    pub rate_limit: RateLimitSection,

    /// Circuit breaker defaults.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Metrics reporting settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl RpcConfig {
    /// Loads configuration from the default path (`parallax.toml`).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("parallax.toml")
    }

    /// Loads configuration from an explicit file path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let figment = Figment::new().merge(InterpolatingToml::file(path)?).merge(
            figment::providers::Env::prefixed("PARALLAX_")
                .split("__")
                .lowercase(false),
        );
        figment.extract::<Self>().map_err(ConfigError::from)
    }

    /// Parses configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new().merge(InterpolatingToml::string(content));
        figment.extract::<Self>().map_err(ConfigError::from)
    }
}

/// Client call pipeline settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Per-request deadline.
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,

    /// Sweep interval for the pending-request map.
    #[serde(
        default = "default_timeout_check_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout_check_interval: Duration,

    /// Upper bound on pending requests; the async facade holds a
    /// semaphore sized at twice this value.
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,

    /// Serializer extension name.
    #[serde(default = "default_serializer")]
    pub serializer: String,

    /// Compressor extension name.
    #[serde(default = "default_compressor")]
    pub compressor: String,

    /// Load balancer extension name.
    #[serde(default = "default_balancer")]
    pub balancer: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            timeout_check_interval: default_timeout_check_interval(),
            max_pending_requests: default_max_pending_requests(),
            serializer: default_serializer(),
            compressor: default_compressor(),
            balancer: default_balancer(),
        }
    }
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_timeout_check_interval() -> Duration {
    Duration::from_secs(10)
}

const fn default_max_pending_requests() -> usize {
    1000
}

fn default_serializer() -> String {
    "json".to_owned()
}

fn default_compressor() -> String {
    "none".to_owned()
}

fn default_balancer() -> String {
    "random".to_owned()
}

/// Connection pool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Maximum connections per endpoint.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Idle time before an available connection is evicted.
    #[serde(
        default = "default_idle_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub idle_timeout: Duration,

    /// Interval of the background health check.
    #[serde(
        default = "default_health_check_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub health_check_interval: Duration,

    /// Maximum queued acquire waiters per endpoint.
    #[serde(default = "default_max_pending_acquires")]
    pub max_pending_acquires: usize,

    /// Timeout for establishing a new connection.
    #[serde(
        default = "default_connect_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub connect_timeout: Duration,

    /// Connections created eagerly per endpoint.
    #[serde(default = "default_warmup_connections")]
    pub warmup_connections: usize,

    /// Disabled pools create a fresh connection per call.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether the background health check runs.
    #[serde(default = "default_true")]
    pub health_check_enabled: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            idle_timeout: default_idle_timeout(),
            health_check_interval: default_health_check_interval(),
            max_pending_acquires: default_max_pending_acquires(),
            connect_timeout: default_connect_timeout(),
            warmup_connections: default_warmup_connections(),
            enabled: default_true(),
            health_check_enabled: default_true(),
        }
    }
}

const fn default_max_connections() -> usize {
    10
}

const fn default_idle_timeout() -> Duration {
    Duration::from_secs(300)
}

const fn default_health_check_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_pending_acquires() -> usize {
    1000
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_warmup_connections() -> usize {
    2
}

/// Server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address and port to bind.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Grace period for in-flight requests during shutdown.
    #[serde(
        default = "default_shutdown_grace",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_grace: Duration,

    /// Upper bound on a single frame.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            shutdown_grace: default_shutdown_grace(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1:9440".to_owned()
}

const fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_frame_size() -> usize {
    1024 * 1024
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Whether the security interceptor runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HMAC signing secret. Must come from configuration; there is no
    /// compiled-in default usable outside tests.
    #[serde(default)]
    pub secret: String,

    /// Substring patterns for services that bypass authentication.
    #[serde(default = "default_public_patterns")]
    pub public_patterns: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            secret: String::new(),
            public_patterns: default_public_patterns(),
        }
    }
}

fn default_public_patterns() -> Vec<String> {
    vec!["HealthCheck".to_owned(), "SystemInfo".to_owned()]
}

/// Rate limiting defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    /// Whether the rate-limit interceptor runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sustained rate, permits per second.
    #[serde(default = "default_rate")]
    pub rate: u64,

    /// Burst capacity.
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Algorithm: `token_bucket` or `sliding_window`.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            rate: default_rate(),
            capacity: default_capacity(),
            algorithm: default_algorithm(),
        }
    }
}

const fn default_rate() -> u64 {
    100
}

const fn default_capacity() -> u64 {
    200
}

fn default_algorithm() -> String {
    "token_bucket".to_owned()
}

/// Circuit breaker defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time before a trial call is allowed.
    #[serde(
        default = "default_recovery_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub recovery_timeout: Duration,

    /// Concurrent trial calls in half-open.
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout() -> Duration {
    Duration::from_secs(60)
}

const fn default_half_open_max_calls() -> u32 {
    3
}

/// Metrics reporting settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// The periodic reporter is opt-in.
    #[serde(default)]
    pub report_enabled: bool,

    /// Reporting interval.
    #[serde(
        default = "default_report_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub report_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_enabled: false,
            report_interval: default_report_interval(),
        }
    }
}

const fn default_report_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_true() -> bool {
    true
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Parses human-readable durations: `100ms`, `5s`, `3m`, bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") {
        let ms: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_millis(ms))
    } else if let Some(stripped) = s.strip_suffix('s') {
        let secs: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    } else if let Some(stripped) = s.strip_suffix('m') {
        let mins: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_secs(mins * 60))
    } else {
        let secs: u64 = s.parse().map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    }
}

struct EnvVarInterpolator;

impl EnvVarInterpolator {
    fn interpolate_value(value: Value) -> Value {
        match value {
            Value::String(_, s) => Value::from(Self::interpolate_string(&s)),
            Value::Dict(tag, dict) => {
                let new_dict: Dict = dict
                    .into_iter()
                    .map(|(k, v)| (k, Self::interpolate_value(v)))
                    .collect();
                Value::Dict(tag, new_dict)
            }
            Value::Array(tag, arr) => {
                let new_arr: Vec<Value> = arr.into_iter().map(Self::interpolate_value).collect();
                Value::Array(tag, new_arr)
            }
            other => other,
        }
    }

    fn interpolate_string(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        let mut chars = s.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();
                let mut var_name = String::new();
                for ch in chars.by_ref() {
                    if ch == '}' {
                        break;
                    }
                    var_name.push(ch);
                }
                if let Ok(val) = std::env::var(&var_name) {
                    result.push_str(&val);
                }
            } else {
                result.push(c);
            }
        }

        result
    }
}

/// TOML provider with `${VAR_NAME}` environment interpolation.
pub struct InterpolatingToml {
    content: String,
}

impl InterpolatingToml {
    /// Creates a provider from a file path.
    pub fn file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|_| ConfigError::FileNotFound(path.as_ref().display().to_string()))?;
        Ok(Self { content })
    }

    /// Creates a provider from a string.
    pub fn string(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl Provider for InterpolatingToml {
    fn metadata(&self) -> Metadata {
        Metadata::named("Interpolating TOML")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, FigmentError> {
        let base = Toml::string(&self.content);
        let base_data = base.data()?;

        let interpolated: Map<Profile, Dict> = base_data
            .into_iter()
            .map(|(profile, dict)| {
                let new_dict: Dict = dict
                    .into_iter()
                    .map(|(k, v)| (k, EnvVarInterpolator::interpolate_value(v)))
                    .collect();
                (profile, new_dict)
            })
            .collect();

        Ok(interpolated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_forms() {
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("3m").unwrap(), Duration::from_secs(180));
        assert_eq!(parse_duration("60").unwrap(), Duration::from_secs(60));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn defaults_cover_the_spec_limits() {
        let config = RpcConfig::parse("").unwrap();

        assert_eq!(config.client.request_timeout, Duration::from_secs(5));
        assert_eq!(config.client.timeout_check_interval, Duration::from_secs(10));
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.pool.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.pool.health_check_interval, Duration::from_secs(30));
        assert_eq!(config.pool.max_pending_acquires, 1000);
        assert_eq!(config.pool.warmup_connections, 2);
        assert_eq!(config.server.shutdown_grace, Duration::from_secs(30));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.breaker.half_open_max_calls, 3);
        assert_eq!(config.rate_limit.rate, 100);
        assert_eq!(config.rate_limit.capacity, 200);
        assert_eq!(config.metrics.report_interval, Duration::from_secs(30));
        assert!(!config.metrics.report_enabled);
    }

    #[test]
    fn file_settings_override_defaults() {
        let config = RpcConfig::parse(
            r#"
            [client]
            request_timeout = "10s"
            serializer = "cbor"
            compressor = "lz4"

            [pool]
            max_connections = 32
            idle_timeout = "2m"

            [security]
            secret = "configured-secret"

            [rate_limit]
            algorithm = "sliding_window"
            "#,
        )
        .unwrap();

        assert_eq!(config.client.request_timeout, Duration::from_secs(10));
        assert_eq!(config.client.serializer, "cbor");
        assert_eq!(config.client.compressor, "lz4");
        assert_eq!(config.pool.max_connections, 32);
        assert_eq!(config.pool.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.security.secret, "configured-secret");
        assert_eq!(config.rate_limit.algorithm, "sliding_window");
    }

    #[test]
    fn env_interpolation_in_values() {
        std::env::set_var("PARALLAX_TEST_SECRET_VALUE", "from-env");
        let config = RpcConfig::parse(
            r#"
            [security]
            secret = "${PARALLAX_TEST_SECRET_VALUE}"
            "#,
        )
        .unwrap();
        assert_eq!(config.security.secret, "from-env");
        std::env::remove_var("PARALLAX_TEST_SECRET_VALUE");
    }

    #[test]
    fn missing_file_errors() {
        assert!(matches!(
            RpcConfig::load_from("/nonexistent/parallax.toml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn public_patterns_default() {
        let config = RpcConfig::parse("").unwrap();
        assert_eq!(config.security.public_patterns, vec!["HealthCheck", "SystemInfo"]);
    }
}
