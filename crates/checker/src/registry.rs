//! Checker registry: one probe constructor per backend kind.
//!
//! The table is static and read-only, so it can be shared by reference
//! across any number of concurrent attempts.

use crate::checkers::{MorayProbe, PostgresProbe, Probe, ProbeContext, RedisProbe, ZookeeperProbe};
use crate::config::EndpointConfig;
use crate::error::ConfigError;
use crate::types::BackendKind;
use std::sync::Arc;

/// Probe constructor
pub type BuildFn = fn(EndpointConfig, ProbeContext) -> Result<Arc<dyn Probe>, ConfigError>;

/// One entry of the registry
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub kind: BackendKind,
    pub label: &'static str,
    pub build: BuildFn,
}

fn build_moray(config: EndpointConfig, ctx: ProbeContext) -> Result<Arc<dyn Probe>, ConfigError> {
    Ok(Arc::new(MorayProbe::new(config, ctx)?))
}

fn build_postgres(config: EndpointConfig, ctx: ProbeContext) -> Result<Arc<dyn Probe>, ConfigError> {
    Ok(Arc::new(PostgresProbe::new(config, ctx)?))
}

fn build_redis(config: EndpointConfig, ctx: ProbeContext) -> Result<Arc<dyn Probe>, ConfigError> {
    Ok(Arc::new(RedisProbe::new(config, ctx)?))
}

fn build_zookeeper(config: EndpointConfig, ctx: ProbeContext) -> Result<Arc<dyn Probe>, ConfigError> {
    Ok(Arc::new(ZookeeperProbe::new(config, ctx)?))
}

/// Every known probe, in display order
pub static REGISTRY: [Registration; 4] = [
    Registration {
        kind: BackendKind::Moray,
        label: "moray",
        build: build_moray,
    },
    Registration {
        kind: BackendKind::Postgres,
        label: "postgres",
        build: build_postgres,
    },
    Registration {
        kind: BackendKind::Redis,
        label: "redis",
        build: build_redis,
    },
    Registration {
        kind: BackendKind::Zookeeper,
        label: "zookeeper",
        build: build_zookeeper,
    },
];

/// Registration for `kind`
pub fn lookup(kind: BackendKind) -> Option<&'static Registration> {
    REGISTRY.iter().find(|r| r.kind == kind)
}

/// Labels of every registered probe, in registry order
pub fn labels() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|r| r.label)
}

/// Build the probe matching `config.kind`.
///
/// Fails with the constructor's [`ConfigError`] when the endpoint is
/// malformed; nothing is connected at this point.
pub fn build_probe(config: EndpointConfig, ctx: ProbeContext) -> Result<Arc<dyn Probe>, ConfigError> {
    let registration = lookup(config.kind)
        .ok_or_else(|| ConfigError::invalid("kind", format!("no probe registered for {}", config.kind)))?;
    (registration.build)(config, ctx)
}
