//! Moray probe.
//!
//! Speaks Fast RPC over a single connection. With a bucket configured the
//! probe looks the bucket up, otherwise it asks for a deep ping. Either RPC
//! failing on the server side means moray is up but unhealthy.

use super::{Probe, ProbeContext, next_frame, probe_span};
use crate::attempt::{Attempt, Phase};
use crate::codec::fast::{FastCodec, FastMessage, FastStatus};
use crate::config::EndpointConfig;
use crate::error::{ConfigError, ProbeError};
use crate::transport::{Connection, Connector, settle};
use crate::types::{BackendKind, Detail};
use async_trait::async_trait;
use futures::SinkExt;
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{Instrument, Span, debug, info, warn};

/// Reconnects allowed within the connect timeout
const CONNECT_RETRIES: u32 = 1;

/// Each attempt owns a fresh connection, so one id is enough
const MSGID: u32 = 1;

pub struct MorayProbe {
    config: EndpointConfig,
    connector: Connector,
    span: Span,
}

impl MorayProbe {
    pub fn new(config: EndpointConfig, ctx: ProbeContext) -> Result<Self, ConfigError> {
        config.validate_for(BackendKind::Moray)?;

        let span = probe_span(&ctx.span, BackendKind::Moray, &config.target());
        span.in_scope(|| {
            info!(
                ip = %config.address,
                port = config.effective_port(),
                bucket = config.probe_target.as_deref(),
                "inited moray checker"
            )
        });

        Ok(Self {
            config,
            connector: ctx.connector,
            span,
        })
    }

    /// Bucket to look up, if any
    pub fn bucket(&self) -> Option<&str> {
        self.config.probe_target.as_deref()
    }

    /// Issue one RPC and collect its results until END
    async fn call(
        framed: &mut Framed<Connection, FastCodec>,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, ProbeError> {
        framed
            .send(FastMessage::request(MSGID, method, args))
            .await?;

        let mut results = Vec::new();
        loop {
            let msg = next_frame(framed).await?;
            if msg.msgid != MSGID {
                debug!(msgid = msg.msgid, "Ignoring frame for another message");
                continue;
            }
            match msg.status {
                FastStatus::Data | FastStatus::End => {
                    match msg.payload() {
                        Value::Array(items) => results.extend(items.iter().cloned()),
                        Value::Null => {}
                        other => results.push(other.clone()),
                    }
                    if msg.status == FastStatus::End {
                        return Ok(results);
                    }
                }
                FastStatus::Error => {
                    return Err(ProbeError::protocol(format!(
                        "{} failed: {}",
                        method,
                        msg.error_summary()
                    )));
                }
            }
        }
    }

    async fn run(&self, attempt: &Attempt) -> Result<Detail, ProbeError> {
        attempt.enter(Phase::Connecting);
        let conn = self
            .connector
            .connect_with_retry(
                &self.config.address,
                self.config.effective_port(),
                self.config.effective_connect_timeout(),
                CONNECT_RETRIES,
            )
            .await?;
        let mut framed = Framed::new(conn, FastCodec);

        attempt.enter(Phase::AwaitingResponse);
        let started = Instant::now();
        let outcome = match self.bucket() {
            Some(bucket) => Self::call(&mut framed, "getBucket", vec![json!({}), json!(bucket)])
                .await
                .map(|results| {
                    let mut detail = Detail::new();
                    let name = results
                        .first()
                        .and_then(|b| b.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or(bucket);
                    detail.insert("bucket".to_string(), Value::from(name));
                    detail
                }),
            None => Self::call(&mut framed, "ping", vec![json!({"deep": true})])
                .await
                .map(|_| Detail::new()),
        };

        let outcome = outcome.map(|mut detail| {
            let latency = started.elapsed().as_millis() as u64;
            debug!(latency_ms = latency, "moray answered");
            detail.insert("latency_ms".to_string(), Value::from(latency));
            detail
        });

        settle(outcome, framed.into_inner().close().await)
    }
}

#[async_trait]
impl Probe for MorayProbe {
    fn label(&self) -> &'static str {
        BackendKind::Moray.label()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Moray
    }

    async fn check(&self, attempt: &Attempt) -> Result<Detail, ProbeError> {
        async {
            let outcome = self.run(attempt).await;
            if let Err(e) = &outcome {
                warn!(error = %e, "moray check failed");
            }
            outcome
        }
        .instrument(self.span.clone())
        .await
    }
}
