//! Probe contract and the four backend probes.

use crate::attempt::Attempt;
use crate::error::ProbeError;
use crate::transport::{Connection, Connector};
use crate::types::{BackendKind, Detail};
use async_trait::async_trait;
use futures::StreamExt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Framed};
use tracing::Span;

pub mod moray;
pub mod postgres;
pub mod redis;
pub mod zookeeper;

pub use moray::MorayProbe;
pub use postgres::PostgresProbe;
pub use redis::RedisProbe;
pub use zookeeper::ZookeeperProbe;

/// Health probe trait
///
/// `check` performs one attempt. Everything the attempt opens lives inside
/// the returned future, so dropping the future (as the harness does on a
/// deadline) releases the connection.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Stable identifier of the backend kind
    fn label(&self) -> &'static str;

    fn kind(&self) -> BackendKind;

    /// Perform one attempt, reporting suspension points to `attempt`
    async fn check(&self, attempt: &Attempt) -> Result<Detail, ProbeError>;
}

/// What a probe needs besides its endpoint
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub connector: Connector,
    /// Parent span for the probe's logs
    pub span: Span,
}

impl Default for ProbeContext {
    fn default() -> Self {
        Self {
            connector: Connector::new(),
            span: Span::current(),
        }
    }
}

impl ProbeContext {
    pub fn with_connector(mut self, connector: Connector) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// Span each probe logs under
fn probe_span(parent: &Span, kind: BackendKind, target: &str) -> Span {
    tracing::info_span!(parent: parent, "probe", kind = kind.label(), target = %target)
}

/// Run `fut`, reporting `Timeout(reported)` if `limit` elapses first
async fn bounded<T, F>(limit: Duration, reported: Duration, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    match timeout(limit, fut).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ProbeError::Timeout(reported)),
    }
}

/// Next decoded frame; the peer hanging up is a connection error
async fn next_frame<C>(framed: &mut Framed<Connection, C>) -> Result<C::Item, ProbeError>
where
    C: Decoder<Error = io::Error>,
{
    match framed.next().await {
        Some(Ok(item)) => Ok(item),
        Some(Err(e)) => Err(e.into()),
        None => Err(ProbeError::connection("connection closed by peer")),
    }
}
