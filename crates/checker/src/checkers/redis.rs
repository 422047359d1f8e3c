//! Redis probe.
//!
//! Connects, authenticates when a password is configured and waits for
//! `PING` to be answered; all of that shares the connect timeout. Then asks
//! for `INFO` and reports a handful of its fields.

use super::{Probe, ProbeContext, bounded, next_frame, probe_span};
use crate::attempt::{Attempt, Phase};
use crate::codec::resp::{Command, RespCodec, RespValue, parse_info};
use crate::config::{Credentials, EndpointConfig};
use crate::error::{ConfigError, ProbeError};
use crate::transport::{Connection, Connector, settle};
use crate::types::{BackendKind, Detail};
use async_trait::async_trait;
use futures::SinkExt;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{Instrument, Span, debug, info, warn};

/// INFO fields copied into the result
const INFO_FIELDS: [&str; 5] = [
    "redis_version",
    "process_id",
    "connected_clients",
    "used_memory_human",
    "used_memory_peak_human",
];

type RespFramed = Framed<Connection, RespCodec>;

fn lookup<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// `AUTH [username] password`; nothing to send without a password
fn auth_command(credentials: &Credentials) -> Option<Command> {
    let password = credentials.password.as_deref()?;
    let command = match credentials.username.as_deref() {
        Some(username) => Command::new("AUTH").arg(username),
        None => Command::new("AUTH"),
    };
    Some(command.arg(password))
}

pub struct RedisProbe {
    config: EndpointConfig,
    connector: Connector,
    span: Span,
}

impl RedisProbe {
    pub fn new(config: EndpointConfig, ctx: ProbeContext) -> Result<Self, ConfigError> {
        config.validate_for(BackendKind::Redis)?;

        let span = probe_span(&ctx.span, BackendKind::Redis, &config.target());
        span.in_scope(|| info!("inited redis checker"));

        Ok(Self {
            config,
            connector: ctx.connector,
            span,
        })
    }

    /// Send one command and wait for its reply; error replies are unhealthy
    async fn call(framed: &mut RespFramed, command: Command) -> Result<RespValue, ProbeError> {
        let name = command.name();
        framed.send(command).await?;
        match next_frame(framed).await? {
            RespValue::Error(e) => Err(ProbeError::protocol(format!("{}: {}", name, e))),
            reply => Ok(reply),
        }
    }

    async fn handshake(&self, framed: &mut RespFramed) -> Result<(), ProbeError> {
        if let Some(auth) = self.config.credentials.as_ref().and_then(auth_command) {
            Self::call(framed, auth).await?;
        }

        match Self::call(framed, Command::new("PING")).await? {
            RespValue::Simple(pong) if pong == "PONG" => Ok(()),
            other => Err(ProbeError::protocol(format!(
                "unexpected reply to PING: {:?}",
                other
            ))),
        }
    }

    async fn info(framed: &mut RespFramed) -> Result<Detail, ProbeError> {
        let reply = Self::call(framed, Command::new("INFO")).await?;
        let text = reply
            .as_text()
            .ok_or_else(|| ProbeError::protocol(format!("unexpected reply to INFO: {:?}", reply)))?;

        let fields = parse_info(&text);
        if lookup(&fields, "loading") == Some("1") {
            return Err(ProbeError::protocol("dataset is still loading"));
        }

        let mut detail = Detail::new();
        for key in INFO_FIELDS {
            if let Some(value) = lookup(&fields, key) {
                detail.insert(key.to_string(), Value::from(value));
            }
        }
        Ok(detail)
    }

    async fn run(&self, attempt: &Attempt) -> Result<Detail, ProbeError> {
        let started = Instant::now();
        let connect_timeout = self.config.effective_connect_timeout();

        attempt.enter(Phase::Connecting);
        let conn = self
            .connector
            .connect(&self.config.address, self.config.effective_port(), connect_timeout)
            .await?;
        let mut framed = Framed::new(conn, RespCodec);

        attempt.enter(Phase::AwaitingReady);
        let remaining = connect_timeout.saturating_sub(started.elapsed());
        let ready = bounded(remaining, connect_timeout, self.handshake(&mut framed)).await;

        let detail = match ready {
            Ok(()) => {
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "redis ready");
                attempt.enter(Phase::AwaitingResponse);
                Self::info(&mut framed).await
            }
            Err(e) => Err(e),
        };

        let closed = if detail.is_ok() {
            match framed.send(Command::new("QUIT")).await {
                Ok(()) => framed.into_inner().close().await,
                Err(e) => Err(e),
            }
        } else {
            framed.into_inner().close().await
        };
        settle(detail, closed)
    }
}

#[async_trait]
impl Probe for RedisProbe {
    fn label(&self) -> &'static str {
        BackendKind::Redis.label()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn check(&self, attempt: &Attempt) -> Result<Detail, ProbeError> {
        async {
            let outcome = self.run(attempt).await;
            if let Err(e) = &outcome {
                warn!(error = %e, "redis check failed");
            }
            outcome
        }
        .instrument(self.span.clone())
        .await
    }
}
