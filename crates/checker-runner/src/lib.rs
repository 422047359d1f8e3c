//! Reference orchestrator for the `checker` probes.
//!
//! Reads the host inventory written by the topology generator, builds one
//! probe per checked endpoint and runs them all through the harness on an
//! interval.
//!
//! # Components
//!
//! - **Hosts**: inventory parsing and role to backend kind mapping
//! - **Runner**: concurrent check rounds and the latest observation per endpoint
//! - **Status server**: `/metrics` for Prometheus and `/status` as JSON

pub mod config;
pub mod hosts;
pub mod http_server;
pub mod metrics;
pub mod runner;

pub use config::{Config, ConfigError};
pub use hosts::{HostRecord, HostsDocument, Target};
pub use http_server::StatusServer;
pub use metrics::MetricsRegistry;
pub use runner::{Observation, Observations, Runner};
