//! ZooKeeper probe.
//!
//! Without a probe target this sends the `ruok` four-letter command and
//! expects the literal reply `imok`. With a znode path as target it opens a
//! session, reads the node and closes the session again.

use super::{Probe, ProbeContext, bounded, next_frame, probe_span};
use crate::attempt::{Attempt, Phase};
use crate::codec::jute::{self, ConnectResponse, ReplyHeader};
use crate::config::EndpointConfig;
use crate::error::{ConfigError, ProbeError};
use crate::transport::{Connection, Connector, settle};
use crate::types::{BackendKind, Detail};
use async_trait::async_trait;
use futures::SinkExt;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{Instrument, Span, debug, info, warn};

/// Session timeout asked for when reading a znode
const SESSION_TIMEOUT_MS: i32 = 30_000;

const GET_DATA_XID: i32 = 1;
const CLOSE_XID: i32 = 2;

pub struct ZookeeperProbe {
    config: EndpointConfig,
    connector: Connector,
    span: Span,
}

impl ZookeeperProbe {
    pub fn new(config: EndpointConfig, ctx: ProbeContext) -> Result<Self, ConfigError> {
        config.validate_for(BackendKind::Zookeeper)?;
        if let Some(path) = &config.probe_target {
            if !path.starts_with('/') {
                return Err(ConfigError::invalid(
                    "probe_target",
                    format!("znode path {:?} must be absolute", path),
                ));
            }
        }

        let span = probe_span(&ctx.span, BackendKind::Zookeeper, &config.target());
        span.in_scope(|| {
            info!(znode = config.probe_target.as_deref(), "inited zookeeper checker")
        });

        Ok(Self {
            config,
            connector: ctx.connector,
            span,
        })
    }

    async fn connect(&self, attempt: &Attempt) -> Result<Connection, ProbeError> {
        attempt.enter(Phase::Connecting);
        self.connector
            .connect(
                &self.config.address,
                self.config.effective_port(),
                self.config.effective_connect_timeout(),
            )
            .await
    }

    async fn ruok(&self, attempt: &Attempt) -> Result<Detail, ProbeError> {
        let mut conn = self.connect(attempt).await?;
        let idle = self.config.effective_connect_timeout();

        let outcome = bounded(idle, idle, async {
            conn.write_all(jute::RUOK).await?;
            attempt.enter(Phase::AwaitingResponse);

            // Decide on the first IMOK.len() bytes; the server may keep the
            // socket open after answering.
            let mut reply = Vec::with_capacity(64);
            let mut chunk = [0u8; 256];
            while reply.len() < jute::IMOK.len() {
                let n = conn.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                reply.extend_from_slice(&chunk[..n]);
            }
            Ok::<_, ProbeError>(String::from_utf8_lossy(&reply).into_owned())
        })
        .await
        .and_then(|data| {
            if data == jute::IMOK {
                let mut detail = Detail::new();
                detail.insert("data".to_string(), Value::from(data));
                Ok(detail)
            } else {
                Err(ProbeError::protocol(format!(
                    "expected {:?} in reply to ruok, got {:?}",
                    jute::IMOK,
                    data
                )))
            }
        });

        settle(outcome, conn.close().await)
    }

    async fn read_znode(&self, attempt: &Attempt, path: &str) -> Result<Detail, ProbeError> {
        let started = Instant::now();
        let conn = self.connect(attempt).await?;
        let mut framed = Framed::new(conn, LengthDelimitedCodec::new());

        let connect_timeout = self.config.effective_connect_timeout();
        let remaining = connect_timeout.saturating_sub(started.elapsed());
        let session = bounded(remaining, connect_timeout, async {
            framed.send(jute::connect_request(SESSION_TIMEOUT_MS)).await?;
            attempt.enter(Phase::AwaitingReady);
            let frame = next_frame(&mut framed).await?;
            Ok::<_, ProbeError>(ConnectResponse::parse(&frame)?)
        })
        .await;

        let session = match session {
            Ok(session) if session.is_established() => session,
            Ok(_) => {
                let _ = framed.into_inner().close().await;
                return Err(ProbeError::protocol("server refused the session"));
            }
            Err(e) => {
                let _ = framed.into_inner().close().await;
                return Err(e);
            }
        };
        debug!(session_id = session.session_id, "Session established");

        attempt.enter(Phase::AwaitingResponse);
        let outcome = self.get_data(&mut framed, path).await;

        let closed = match framed.send(jute::close_session_request(CLOSE_XID)).await {
            Ok(()) => framed.into_inner().close().await,
            Err(e) => Err(e),
        };
        settle(outcome, closed)
    }

    async fn get_data(
        &self,
        framed: &mut Framed<Connection, LengthDelimitedCodec>,
        path: &str,
    ) -> Result<Detail, ProbeError> {
        framed.send(jute::get_data_request(GET_DATA_XID, path)).await?;

        let frame = next_frame(framed).await?;
        let mut record: &[u8] = &frame;
        let header = ReplyHeader::parse(&mut record)?;
        if header.err != 0 {
            return Err(ProbeError::protocol(format!(
                "{} ({}) reading {}",
                jute::error_name(header.err),
                header.err,
                path
            )));
        }

        let data = jute::parse_get_data_body(&mut record)?;
        let mut detail = Detail::new();
        detail.insert("path".to_string(), Value::from(path));
        match data {
            Some(bytes) => {
                detail.insert("data_length".to_string(), Value::from(bytes.len()));
                detail.insert(
                    "data".to_string(),
                    Value::from(String::from_utf8_lossy(&bytes).into_owned()),
                );
            }
            None => {
                detail.insert("data_length".to_string(), Value::from(0));
                detail.insert("data".to_string(), Value::Null);
            }
        }
        Ok(detail)
    }
}

#[async_trait]
impl Probe for ZookeeperProbe {
    fn label(&self) -> &'static str {
        BackendKind::Zookeeper.label()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Zookeeper
    }

    async fn check(&self, attempt: &Attempt) -> Result<Detail, ProbeError> {
        async {
            let outcome = match self.config.probe_target.as_deref() {
                Some(path) => self.read_znode(attempt, path).await,
                None => self.ruok(attempt).await,
            };

            match &outcome {
                Ok(_) => debug!("zookeeper check passed"),
                Err(e) => warn!(error = %e, "zookeeper check failed"),
            }
            outcome
        }
        .instrument(self.span.clone())
        .await
    }
}
