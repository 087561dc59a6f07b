//! Connection and client configuration.
//!
//! Configuration values are plain data: hosts build them in code or load them
//! with any serde format. Defaults and limits live in [`RpcDefaults`].

use crate::error::{Result, RpcError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Defaults and limits shared by client and server.
pub struct RpcDefaults;

impl RpcDefaults {
    pub const HOST: &'static str = "localhost";
    pub const PORT: u16 = 5556;
    pub const TIMEOUT: Duration = Duration::from_secs(15);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Upper bound for one multipart message.
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
    /// Upper bound for the number of parts in one message.
    pub const MAX_MESSAGE_PARTS: usize = 64;
    /// Depth of the router's inbound queue.
    pub const INBOUND_QUEUE_DEPTH: usize = 1024;
    /// How long a closed socket keeps flushing messages already queued.
    pub const LINGER: Duration = Duration::from_secs(1);
    /// How long a stopping server waits for requests in flight.
    pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Transport protocol of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Reliable stream (TCP).
    #[default]
    Tcp,
    /// Datagram. Accepted in configuration, rejected by the transport.
    Udp,
    /// In-process channels; client and server share a `TransportContext`.
    InProc,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::InProc => "inproc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "inproc" => Ok(Protocol::InProc),
            other => Err(RpcError::config(format!("Unknown protocol: {}", other))),
        }
    }
}

/// Where a server binds or a client connects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionConfiguration {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl ConnectionConfiguration {
    /// Create a connection configuration. The host must not be blank.
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(RpcError::config("Connection host cannot be empty"));
        }
        Ok(Self {
            host,
            port,
            protocol,
        })
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::new(host, port, Protocol::Tcp)
    }

    pub fn inproc(name: impl Into<String>, port: u16) -> Result<Self> {
        Self::new(name, port, Protocol::InProc)
    }

    /// Canonical destination string, e.g. `tcp://localhost:5556`.
    pub fn endpoint(&self) -> String {
        self.to_string()
    }

    /// Same host and protocol on a different port (used after binding port 0).
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }
}

impl Default for ConnectionConfiguration {
    fn default() -> Self {
        Self {
            host: RpcDefaults::HOST.to_string(),
            port: RpcDefaults::PORT,
            protocol: Protocol::Tcp,
        }
    }
}

impl fmt::Display for ConnectionConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl FromStr for ConnectionConfiguration {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| RpcError::config(format!("Endpoint '{}' is missing a protocol", s)))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| RpcError::config(format!("Endpoint '{}' is missing a port", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| RpcError::config(format!("Invalid port in '{}': {}", s, e)))?;
        Self::new(host, port, scheme.parse()?)
    }
}

/// Client-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfiguration {
    /// Timeout for methods without an override.
    #[serde(with = "duration_millis")]
    pub default_timeout: Duration,
    pub connection: ConnectionConfiguration,
    /// Prefix of the routing identity of every connection this client opens.
    #[serde(default = "default_identifier")]
    pub identifier: String,
}

impl ClientConfiguration {
    pub fn new(connection: ConnectionConfiguration) -> Self {
        Self {
            connection,
            ..Self::default()
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        Self {
            default_timeout: RpcDefaults::TIMEOUT,
            connection: ConnectionConfiguration::default(),
            identifier: default_identifier(),
        }
    }
}

fn default_identifier() -> String {
    uuid::Uuid::new_v4().to_string()
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_configuration_defaults() {
        let config = ClientConfiguration::default().with_default_timeout(Duration::from_secs(10));
        assert_eq!(config.default_timeout, Duration::from_secs(10));
        assert_eq!(config.connection.endpoint(), "tcp://localhost:5556");
        assert!(!config.identifier.is_empty());
    }

    #[test]
    fn test_client_identifiers_are_unique() {
        let a = ClientConfiguration::default();
        let b = ClientConfiguration::default();
        assert_ne!(a.identifier, b.identifier);
    }

    #[test]
    fn test_connection_endpoint_format() {
        let config = ConnectionConfiguration::new("127.0.0.1", 4242, Protocol::InProc).unwrap();
        assert_eq!(config.to_string(), "inproc://127.0.0.1:4242");
    }

    #[test]
    fn test_empty_host_rejected() {
        let result = ConnectionConfiguration::new("", 4242, Protocol::InProc);
        assert!(matches!(result, Err(RpcError::Configuration { .. })));

        let result = ConnectionConfiguration::new("   ", 4242, Protocol::Tcp);
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint_parses_back() {
        let parsed: ConnectionConfiguration = "tcp://10.0.0.5:7000".parse().unwrap();
        assert_eq!(parsed.host, "10.0.0.5");
        assert_eq!(parsed.port, 7000);
        assert_eq!(parsed.protocol, Protocol::Tcp);

        assert!("10.0.0.5:7000".parse::<ConnectionConfiguration>().is_err());
        assert!("tcp://10.0.0.5:99999".parse::<ConnectionConfiguration>().is_err());
        assert!("ipc://x:1".parse::<ConnectionConfiguration>().is_err());
    }

    #[test]
    fn test_client_configuration_serde() {
        let config = ClientConfiguration::new(ConnectionConfiguration::inproc("svc", 1).unwrap())
            .with_default_timeout(Duration::from_millis(2500))
            .with_identifier("client-a");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["defaultTimeout"], 2500);
        assert_eq!(json["connection"]["protocol"], "inproc");

        let parsed: ClientConfiguration = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_identifier_gets_fresh_uuid() {
        let json = r#"{
            "defaultTimeout": 5000,
            "connection": { "host": "localhost", "port": 5556, "protocol": "tcp" }
        }"#;
        let a: ClientConfiguration = serde_json::from_str(json).unwrap();
        let b: ClientConfiguration = serde_json::from_str(json).unwrap();

        assert_eq!(a.default_timeout, Duration::from_millis(5000));
        assert!(uuid::Uuid::parse_str(&a.identifier).is_ok());
        assert_ne!(a.identifier, b.identifier);
    }
}
