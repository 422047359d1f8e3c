//! Health check types and structures.

use crate::attempt::Phase;
use crate::error::ProbeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Diagnostic payload attached to a result.
pub type Detail = serde_json::Map<String, serde_json::Value>;

/// Backend kind a probe speaks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Moray key/value store (Fast RPC)
    Moray,
    /// PostgreSQL
    Postgres,
    /// Redis cache
    Redis,
    /// ZooKeeper coordination service
    Zookeeper,
}

impl BackendKind {
    /// Every kind, in registry order.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Moray,
        BackendKind::Postgres,
        BackendKind::Redis,
        BackendKind::Zookeeper,
    ];

    /// Stable label used for display and config routing
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::Moray => "moray",
            BackendKind::Postgres => "postgres",
            BackendKind::Redis => "redis",
            BackendKind::Zookeeper => "zookeeper",
        }
    }

    /// Port used when an endpoint does not name one
    pub fn default_port(self) -> u16 {
        match self {
            BackendKind::Moray => 2020,
            BackendKind::Postgres => 5432,
            BackendKind::Redis => 6379,
            BackendKind::Zookeeper => 2181,
        }
    }

    /// Connect timeout used when an endpoint does not name one
    pub fn default_connect_timeout(self) -> Duration {
        Duration::from_secs(5)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown backend kind: {}", s))
    }
}

/// Classified reason an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Transport-level failure: refused, reset, DNS failure, unexpected close
    #[serde(rename = "CONNECTION_ERROR")]
    Connection,
    /// Backend answered, but the answer says it is unhealthy or is malformed
    #[serde(rename = "PROTOCOL_ERROR")]
    Protocol,
    /// Deadline elapsed before a terminal transport event
    Timeout,
}

impl ErrorKind {
    /// Short lowercase form, used as a metrics label
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection_error",
            ErrorKind::Protocol => "protocol_error",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Connection => write!(f, "CONNECTION_ERROR"),
            ErrorKind::Protocol => write!(f, "PROTOCOL_ERROR"),
            ErrorKind::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Outcome of one attempt, delivered exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Whether the backend is reachable and healthy
    pub ok: bool,

    /// Classified failure, absent on success
    pub error_kind: Option<ErrorKind>,

    /// Human readable reason for a failure
    pub message: Option<String>,

    /// Optional diagnostic payload
    pub detail: Option<Detail>,

    /// Wall time spent on the attempt
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl CheckResult {
    /// Create a healthy result
    pub fn healthy(duration: Duration, detail: Detail) -> Self {
        Self {
            ok: true,
            error_kind: None,
            message: None,
            detail: (!detail.is_empty()).then_some(detail),
            duration,
        }
    }

    /// Create a failed result from a classified probe error
    pub fn failed(duration: Duration, error: &ProbeError) -> Self {
        Self {
            ok: false,
            error_kind: Some(error.kind()),
            message: Some(error.to_string()),
            detail: None,
            duration,
        }
    }

    /// Create a timeout result for a deadline that fired in `phase`
    pub fn timeout(deadline: Duration, phase: Phase) -> Self {
        let mut detail = Detail::new();
        detail.insert(
            "deadline_ms".to_string(),
            serde_json::Value::from(deadline.as_millis() as u64),
        );
        detail.insert(
            "phase".to_string(),
            serde_json::Value::from(phase.to_string()),
        );

        Self {
            ok: false,
            error_kind: Some(ErrorKind::Timeout),
            message: Some(format!("Health check timed out after {:?}", deadline)),
            detail: Some(detail),
            duration: deadline,
        }
    }

    /// Attach a detail entry, creating the map if needed
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.detail
            .get_or_insert_with(Detail::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// Check if the result is healthy
    pub fn is_healthy(&self) -> bool {
        self.ok
    }
}
