//! Backend health probes for Manta-style deployments.
//!
//! This crate checks the stateful services a deployment depends on:
//! - Moray (Fast RPC bucket lookup or deep ping)
//! - PostgreSQL (`SELECT NOW()`)
//! - Redis (`INFO`)
//! - ZooKeeper (`ruok`, or reading a znode)
//!
//! Every probe runs through the same [`Harness`], which bounds the attempt
//! with a deadline, delivers exactly one [`CheckResult`] and makes sure the
//! attempt's connection is closed before that happens.
//!
//! # Example
//!
//! ```no_run
//! use checker::{BackendKind, EndpointConfig, Harness, ProbeContext, registry};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EndpointConfig::new(BackendKind::Zookeeper, "10.0.0.10")
//!     .with_connect_timeout(Duration::from_secs(1));
//! let probe = registry::build_probe(config, ProbeContext::default())?;
//!
//! let result = Harness::new(Duration::from_secs(2)).run(probe).await;
//! if !result.ok {
//!     println!("{}: {:?}", result.error_kind.unwrap_or(checker::ErrorKind::Connection), result.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod attempt;
pub mod checkers;
pub mod codec;
pub mod config;
pub mod error;
pub mod harness;
pub mod registry;
pub mod transport;
pub mod types;

pub use attempt::{Attempt, Cause, Phase};
pub use checkers::{MorayProbe, PostgresProbe, Probe, ProbeContext, RedisProbe, ZookeeperProbe};
pub use config::{Credentials, EndpointConfig};
pub use error::{ConfigError, ProbeError};
pub use harness::{Harness, run_with_deadline};
pub use transport::{Connection, ConnectionTracker, Connector};
pub use types::{BackendKind, CheckResult, Detail, ErrorKind};
