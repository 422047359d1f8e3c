//! Error taxonomy for probes and endpoint configuration.

use crate::types::{BackendKind, ErrorKind};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// A classified failure of a single attempt.
///
/// Backend and library errors are mapped into one of these variants before
/// they leave a probe, so callers never need backend specific knowledge.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unhealthy response: {0}")]
    Protocol(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ProbeError {
    /// Create a new connection error.
    pub fn connection(msg: impl std::fmt::Display) -> Self {
        ProbeError::Connection(msg.to_string())
    }

    /// Create a new protocol error.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        ProbeError::Protocol(msg.to_string())
    }

    /// The error kind reported to the orchestrator
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::Connection(_) => ErrorKind::Connection,
            ProbeError::Protocol(_) => ErrorKind::Protocol,
            ProbeError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

impl From<io::Error> for ProbeError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => ProbeError::Timeout(Duration::ZERO),
            io::ErrorKind::InvalidData => ProbeError::Protocol(e.to_string()),
            _ => ProbeError::Connection(e.to_string()),
        }
    }
}

/// Malformed or missing endpoint parameters.
///
/// Raised synchronously at construction, never through the harness.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("endpoint kind {found} given to a {expected} probe")]
    KindMismatch {
        expected: BackendKind,
        found: BackendKind,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
