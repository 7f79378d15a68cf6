//! Configuration types for the isy-stream crate
//!
//! This module defines the connection parameters and read-loop tuning that
//! control a [`Session`](crate::Session).

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Result, StreamError};

/// TLS protocol version used when the controller is served over HTTPS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    /// TLS 1.1, used by older controller firmware
    Tls1_1,
    /// TLS 1.2
    Tls1_2,
}

impl TlsVersion {
    /// Parse the `1.1` / `1.2` notation used by controller settings
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "1.1" => Some(TlsVersion::Tls1_1),
            "1.2" => Some(TlsVersion::Tls1_2),
            _ => None,
        }
    }
}

/// HTTP Basic credentials sent in the subscribe messages
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Value of the `Authorization` header
    pub fn authorization_header(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for the event stream Session
///
/// Holds the connection parameters (address, port, TLS, stream id) and the
/// read-loop tuning values.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Controller host name or IP address
    pub address: String,

    /// Controller port
    /// Default: 80
    pub port: u16,

    /// TLS version; `None` means plaintext
    /// Default: None
    pub tls: Option<TlsVersion>,

    /// Stream id from a previous session, used to resubscribe
    /// Default: None
    pub stream_id: Option<String>,

    /// Path prefix appended to the Host header
    /// Default: empty
    pub webroot: String,

    /// Credentials for the Authorization header
    /// Default: None
    pub credentials: Option<Credentials>,

    /// Upper bound on a single wait for socket readability
    /// Default: 10 seconds
    pub poll_interval: Duration,

    /// Size of each socket read
    /// Default: 4096
    pub read_buffer_size: usize,

    /// Timeout for establishing the TCP connection
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// Extra time allowed beyond the heartbeat interval the controller declares.
    /// The controller's own check works in whole seconds.
    /// Default: 1 second
    pub heartbeat_grace: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 80,
            tls: None,
            stream_id: None,
            webroot: String::new(),
            credentials: None,
            poll_interval: Duration::from_secs(10),
            read_buffer_size: 4096,
            connect_timeout: Duration::from_secs(10),
            heartbeat_grace: Duration::from_secs(1),
        }
    }
}

impl StreamConfig {
    /// Create a plaintext configuration for the given controller
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            ..Default::default()
        }
    }

    /// Create a TLS configuration on the standard HTTPS port
    pub fn https(address: impl Into<String>, version: TlsVersion) -> Self {
        Self {
            address: address.into(),
            port: 443,
            tls: Some(version),
            ..Default::default()
        }
    }

    /// Build a configuration from `ISY_*` environment variables
    ///
    /// Reads `ISY_ADDRESS`, `ISY_PORT`, `ISY_TLS`, `ISY_USERNAME`,
    /// `ISY_PASSWORD` and `ISY_WEBROOT`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = lookup("ISY_ADDRESS")
            .ok_or_else(|| StreamError::Configuration("ISY_ADDRESS is not set".to_string()))?;

        let tls = match lookup("ISY_TLS") {
            Some(raw) => Some(TlsVersion::parse(&raw).ok_or_else(|| {
                StreamError::Configuration(format!("Unsupported TLS version: {raw}"))
            })?),
            None => None,
        };

        let default_port = if tls.is_some() { 443 } else { 80 };
        let port = match lookup("ISY_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| StreamError::Configuration(format!("Invalid ISY_PORT: {raw}")))?,
            None => default_port,
        };

        let credentials = match (lookup("ISY_USERNAME"), lookup("ISY_PASSWORD")) {
            (Some(user), Some(pass)) => Some(Credentials::new(user, pass)),
            _ => None,
        };

        let config = Self {
            address,
            port,
            tls,
            credentials,
            webroot: lookup("ISY_WEBROOT").unwrap_or_default(),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(StreamError::Configuration(
                "Controller address must not be empty".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(StreamError::Configuration(
                "Controller port must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval == Duration::ZERO {
            return Err(StreamError::Configuration(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.read_buffer_size == 0 {
            return Err(StreamError::Configuration(
                "Read buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// `host:port` string used for dialing
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn with_tls(mut self, version: TlsVersion) -> Self {
        self.tls = Some(version);
        self
    }

    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_webroot(mut self, webroot: impl Into<String>) -> Self {
        self.webroot = webroot.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_heartbeat_grace(mut self, grace: Duration) -> Self {
        self.heartbeat_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.port, 80);
        assert!(config.tls.is_none());
        assert!(config.stream_id.is_none());
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.read_buffer_size, 4096);
        assert_eq!(config.heartbeat_grace, Duration::from_secs(1));
        // No address yet
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(StreamConfig::new("192.168.1.20", 80).validate().is_ok());
        assert!(StreamConfig::new("  ", 80).validate().is_err());
        assert!(StreamConfig::new("192.168.1.20", 0).validate().is_err());

        let zero_poll = StreamConfig::new("192.168.1.20", 80).with_poll_interval(Duration::ZERO);
        assert!(zero_poll.validate().is_err());
    }

    #[test]
    fn test_https_preset() {
        let config = StreamConfig::https("isy.local", TlsVersion::Tls1_1);
        assert_eq!(config.port, 443);
        assert_eq!(config.tls, Some(TlsVersion::Tls1_1));
        assert_eq!(config.socket_address(), "isy.local:443");
    }

    #[test]
    fn test_builder_pattern() {
        let config = StreamConfig::new("10.0.0.5", 8080)
            .with_tls(TlsVersion::Tls1_2)
            .with_stream_id("uuid:42")
            .with_credentials(Credentials::new("admin", "admin"))
            .with_webroot("/isy")
            .with_heartbeat_grace(Duration::from_secs(5));

        assert_eq!(config.tls, Some(TlsVersion::Tls1_2));
        assert_eq!(config.stream_id.as_deref(), Some("uuid:42"));
        assert_eq!(config.webroot, "/isy");
        assert_eq!(config.heartbeat_grace, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tls_version_parse() {
        assert_eq!(TlsVersion::parse("1.1"), Some(TlsVersion::Tls1_1));
        assert_eq!(TlsVersion::parse(" 1.2 "), Some(TlsVersion::Tls1_2));
        assert_eq!(TlsVersion::parse("1.3"), None);
    }

    #[test]
    fn test_authorization_header() {
        let creds = Credentials::new("admin", "admin");
        assert_eq!(creds.authorization_header(), "Basic YWRtaW46YWRtaW4=");

        let debug = format!("{:?}", Credentials::new("admin", "hunter2"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_from_lookup() {
        let config = StreamConfig::from_lookup(lookup_from(&[
            ("ISY_ADDRESS", "192.168.1.20"),
            ("ISY_TLS", "1.2"),
            ("ISY_USERNAME", "admin"),
            ("ISY_PASSWORD", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.address, "192.168.1.20");
        assert_eq!(config.port, 443);
        assert_eq!(config.tls, Some(TlsVersion::Tls1_2));
        assert_eq!(config.credentials.unwrap().username, "admin");
    }

    #[test]
    fn test_from_lookup_errors() {
        assert!(StreamConfig::from_lookup(lookup_from(&[])).is_err());
        assert!(StreamConfig::from_lookup(lookup_from(&[
            ("ISY_ADDRESS", "192.168.1.20"),
            ("ISY_PORT", "eighty"),
        ]))
        .is_err());
        assert!(StreamConfig::from_lookup(lookup_from(&[
            ("ISY_ADDRESS", "192.168.1.20"),
            ("ISY_TLS", "3.0"),
        ]))
        .is_err());
    }
}
