//! Postgres probe.
//!
//! Opens a session through `tokio-postgres` over a connection from our own
//! connector and asks the server for its clock.

use super::{Probe, ProbeContext, bounded, probe_span};
use crate::attempt::{Attempt, Phase};
use crate::config::EndpointConfig;
use crate::error::{ConfigError, ProbeError};
use crate::transport::{Connector, settle};
use crate::types::{BackendKind, Detail};
use async_trait::async_trait;
use serde_json::Value;
use std::io;
use tokio::time::Instant;
use tokio_postgres::config::SslMode;
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::{Instrument, Span, debug, info, warn};

const DEFAULT_DATABASE: &str = "postgres";
const APPLICATION_NAME: &str = "madtom";
const QUERY: &str = "SELECT NOW() AS \"date\"";

/// Server-reported errors mean postgres answered; anything else is transport
fn classify(e: tokio_postgres::Error) -> ProbeError {
    match e.as_db_error() {
        Some(db) => ProbeError::protocol(format!("{}: {}", db.code().code(), db.message())),
        None => ProbeError::connection(e),
    }
}

pub struct PostgresProbe {
    config: EndpointConfig,
    pg: tokio_postgres::Config,
    connector: Connector,
    span: Span,
}

impl PostgresProbe {
    pub fn new(config: EndpointConfig, ctx: ProbeContext) -> Result<Self, ConfigError> {
        config.validate_for(BackendKind::Postgres)?;
        let credentials = config.credentials.as_ref();
        let username = credentials
            .and_then(|c| c.username.as_deref())
            .ok_or(ConfigError::MissingField("credentials.username"))?;

        let database = config.probe_target.as_deref().unwrap_or(DEFAULT_DATABASE);
        let mut pg = tokio_postgres::Config::new();
        pg.user(username)
            .dbname(database)
            .application_name(APPLICATION_NAME)
            .ssl_mode(SslMode::Disable)
            .connect_timeout(config.effective_connect_timeout());
        if let Some(password) = credentials.and_then(|c| c.password.as_ref()) {
            pg.password(password);
        }

        let span = probe_span(&ctx.span, BackendKind::Postgres, &config.target());
        span.in_scope(|| {
            info!(
                user = %username,
                database,
                "inited postgres checker"
            )
        });

        Ok(Self {
            config,
            pg,
            connector: ctx.connector,
            span,
        })
    }

    async fn run(&self, attempt: &Attempt) -> Result<Detail, ProbeError> {
        let started = Instant::now();
        let connect_timeout = self.config.effective_connect_timeout();

        attempt.enter(Phase::Connecting);
        let conn = self
            .connector
            .connect(&self.config.address, self.config.effective_port(), connect_timeout)
            .await?;

        attempt.enter(Phase::AwaitingReady);
        let remaining = connect_timeout.saturating_sub(started.elapsed());
        let (client, connection) = bounded(remaining, connect_timeout, async {
            self.pg.connect_raw(conn, NoTls).await.map_err(classify)
        })
        .await?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "postgres session ready");

        attempt.enter(Phase::AwaitingResponse);
        // The connection only makes progress while polled, and finishes once
        // the client is gone.
        let query = async move {
            let rows = client.simple_query(QUERY).await;
            drop(client);
            rows
        };
        let (rows, closed) = tokio::join!(query, connection);

        let outcome = rows.map_err(classify).and_then(|messages| {
            let date = messages
                .iter()
                .find_map(|m| match m {
                    SimpleQueryMessage::Row(row) => Some(row.try_get(0)),
                    _ => None,
                })
                .ok_or_else(|| ProbeError::protocol("query returned no rows"))?
                .map_err(classify)?
                .ok_or_else(|| ProbeError::protocol("server returned a null date"))?;

            let mut detail = Detail::new();
            detail.insert("date".to_string(), Value::from(date));
            Ok(detail)
        });

        settle(outcome, closed.map_err(io::Error::other))
    }
}

#[async_trait]
impl Probe for PostgresProbe {
    fn label(&self) -> &'static str {
        BackendKind::Postgres.label()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn check(&self, attempt: &Attempt) -> Result<Detail, ProbeError> {
        async {
            let outcome = self.run(attempt).await;
            match &outcome {
                Ok(detail) => debug!(date = ?detail.get("date"), "postgres check passed"),
                Err(e) => warn!(error = %e, "postgres check failed"),
            }
            outcome
        }
        .instrument(self.span.clone())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;

    #[test]
    fn test_requires_username() {
        let config = EndpointConfig::new(BackendKind::Postgres, "10.0.0.2");
        assert_eq!(
            PostgresProbe::new(config, ProbeContext::default()).err(),
            Some(ConfigError::MissingField("credentials.username"))
        );
    }

    #[test]
    fn test_password_alone_is_not_enough() {
        let config = EndpointConfig::new(BackendKind::Postgres, "10.0.0.2")
            .with_credentials(Credentials::password_only("secret"));
        assert_eq!(
            PostgresProbe::new(config, ProbeContext::default()).err(),
            Some(ConfigError::MissingField("credentials.username"))
        );
    }

    #[test]
    fn test_database_defaults_to_postgres() {
        let config = EndpointConfig::new(BackendKind::Postgres, "10.0.0.2")
            .with_credentials(Credentials::new("postgres", None));
        let probe = PostgresProbe::new(config, ProbeContext::default()).unwrap();
        assert_eq!(probe.pg.get_dbname(), Some("postgres"));
        assert_eq!(probe.pg.get_application_name(), Some("madtom"));

        let config = EndpointConfig::new(BackendKind::Postgres, "10.0.0.2")
            .with_credentials(Credentials::new("postgres", Some("secret".to_string())))
            .with_probe_target("moray");
        let probe = PostgresProbe::new(config, ProbeContext::default()).unwrap();
        assert_eq!(probe.pg.get_dbname(), Some("moray"));
        assert_eq!(probe.pg.get_password(), Some(&b"secret"[..]));
    }
}
