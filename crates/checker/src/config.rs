//! Endpoint configuration consumed by probes.

use crate::error::ConfigError;
use crate::types::BackendKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Credentials for backends that authenticate
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Absent for backends authenticated by password alone
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: Some(username.into()),
            password,
        }
    }

    /// Credentials carrying only a password, such as a Redis `requirepass`
    pub fn password_only(password: impl Into<String>) -> Self {
        Self {
            username: None,
            password: Some(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One backend instance to check.
///
/// Immutable once built; each probe owns its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Backend kind
    pub kind: BackendKind,

    /// Host name or IP address
    pub address: String,

    /// Port, the per-kind default when absent
    #[serde(default)]
    pub port: Option<u16>,

    /// Connect timeout, the per-kind default when absent
    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Kind specific target: a moray bucket, a znode path or a database name
    #[serde(default)]
    pub probe_target: Option<String>,
}

impl EndpointConfig {
    pub fn new(kind: BackendKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
            port: None,
            connect_timeout: None,
            credentials: None,
            probe_target: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_probe_target(mut self, target: impl Into<String>) -> Self {
        self.probe_target = Some(target.into());
        self
    }

    /// Configured port or the kind's default
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.kind.default_port())
    }

    /// Configured connect timeout or the kind's default
    pub fn effective_connect_timeout(&self) -> Duration {
        self.connect_timeout
            .unwrap_or_else(|| self.kind.default_connect_timeout())
    }

    /// `address:port` with the effective port
    pub fn target(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.effective_port())
        } else {
            format!("{}:{}", self.address, self.effective_port())
        }
    }

    /// Reject fields no probe could use
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::MissingField("address"));
        }
        if self.address.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid("address", "contains whitespace"));
        }
        if self.port == Some(0) {
            return Err(ConfigError::invalid("port", "must be non-zero"));
        }
        if self.connect_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::invalid("connect_timeout", "must be non-zero"));
        }
        if let Some(target) = &self.probe_target {
            if target.trim().is_empty() {
                return Err(ConfigError::invalid("probe_target", "must not be blank"));
            }
        }
        if let Some(username) = self.credentials.as_ref().and_then(|c| c.username.as_ref()) {
            if username.trim().is_empty() {
                return Err(ConfigError::invalid("credentials.username", "must not be blank"));
            }
        }
        Ok(())
    }

    /// Validate and check that the config was meant for `expected`
    pub(crate) fn validate_for(&self, expected: BackendKind) -> Result<(), ConfigError> {
        if self.kind != expected {
            return Err(ConfigError::KindMismatch {
                expected,
                found: self.kind,
            });
        }
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply() {
        let config = EndpointConfig::new(BackendKind::Moray, "10.0.0.5");
        assert_eq!(config.effective_port(), 2020);
        assert_eq!(config.effective_connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.target(), "10.0.0.5:2020");
    }

    #[test]
    fn test_overrides_win() {
        let config = EndpointConfig::new(BackendKind::Redis, "::1")
            .with_port(7000)
            .with_connect_timeout(Duration::from_millis(50));
        assert_eq!(config.effective_port(), 7000);
        assert_eq!(config.effective_connect_timeout(), Duration::from_millis(50));
        assert_eq!(config.target(), "[::1]:7000");
    }

    #[test]
    fn test_validation_rejects_missing_address() {
        let config = EndpointConfig::new(BackendKind::Zookeeper, "  ");
        assert_eq!(config.validate(), Err(ConfigError::MissingField("address")));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let config = EndpointConfig::new(BackendKind::Zookeeper, "127.0.0.1").with_port(0);
        assert!(config.validate().is_err());

        let config = EndpointConfig::new(BackendKind::Zookeeper, "127.0.0.1")
            .with_connect_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config =
            EndpointConfig::new(BackendKind::Zookeeper, "127.0.0.1").with_probe_target(" ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_kind_mismatch() {
        let config = EndpointConfig::new(BackendKind::Redis, "127.0.0.1");
        assert!(matches!(
            config.validate_for(BackendKind::Moray),
            Err(ConfigError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_parsing_with_humantime() {
        let config: EndpointConfig = serde_json::from_value(serde_json::json!({
            "kind": "postgres",
            "address": "10.1.2.3",
            "connect_timeout": "250ms",
            "credentials": { "username": "postgres" }
        }))
        .unwrap();
        assert_eq!(config.kind, BackendKind::Postgres);
        assert_eq!(config.connect_timeout, Some(Duration::from_millis(250)));
        let credentials = config.credentials.unwrap();
        assert_eq!(credentials.username.as_deref(), Some("postgres"));
        assert_eq!(credentials.password, None);
    }

    #[test]
    fn test_password_only_credentials() {
        let config = EndpointConfig::new(BackendKind::Redis, "127.0.0.1")
            .with_credentials(Credentials::password_only("hunter2"));
        assert!(config.validate().is_ok());

        let config = EndpointConfig::new(BackendKind::Redis, "127.0.0.1")
            .with_credentials(Credentials::new(" ", Some("hunter2".to_string())));
        assert!(config.validate().is_err());

        let parsed: Credentials =
            serde_json::from_value(serde_json::json!({ "password": "hunter2" })).unwrap();
        assert_eq!(parsed, Credentials::password_only("hunter2"));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("admin", Some("hunter2".to_string()));
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("admin"));
    }
}
