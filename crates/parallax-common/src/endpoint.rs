//! Service endpoint addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A network endpoint offering one or more services.
///
/// Endpoints are immutable once constructed; discovery replaces whole lists
/// rather than mutating entries in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint from host and port.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error parsing an `host:port` endpoint string.
#[derive(Error, Debug)]
#[error("invalid endpoint address: {0}")]
pub struct InvalidEndpoint(pub String);

impl FromStr for Endpoint {
    type Err = InvalidEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| InvalidEndpoint(s.to_owned()))?;
        if host.is_empty() {
            return Err(InvalidEndpoint(s.to_owned()));
        }
        let port = port.parse().map_err(|_| InvalidEndpoint(s.to_owned()))?;
        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_roundtrip() {
        let endpoint = Endpoint::new("127.0.0.1", 8001);
        let parsed: Endpoint = endpoint.to_string().parse().unwrap();
        assert_eq!(parsed, endpoint);
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!("no-port".parse::<Endpoint>().is_err());
        assert!(":8080".parse::<Endpoint>().is_err());
        assert!("host:notaport".parse::<Endpoint>().is_err());
        assert!("host:99999".parse::<Endpoint>().is_err());
    }

    #[test]
    fn ordering_is_by_host_then_port() {
        let mut endpoints = vec![
            Endpoint::new("b", 1),
            Endpoint::new("a", 2),
            Endpoint::new("a", 1),
        ];
        endpoints.sort();
        assert_eq!(
            endpoints,
            vec![
                Endpoint::new("a", 1),
                Endpoint::new("a", 2),
                Endpoint::new("b", 1),
            ]
        );
    }
}
