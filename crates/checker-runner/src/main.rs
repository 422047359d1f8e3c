//! Madtom checker binary

use anyhow::Context;
use checker_runner::{Config, HostsDocument, MetricsRegistry, Runner, StatusServer};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "madtom-checker", version, about = "Health checks for Manta backends")]
struct Cli {
    /// Configuration file; the standard locations are searched otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host inventory, overriding `checks.hosts_file`
    #[arg(short = 'f', long)]
    hosts: Option<PathBuf>,

    /// Run a single round, print it as JSON and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Tracing is not up yet, so configuration errors go to stderr via anyhow
    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load().context("loading configuration")?,
    };

    common::logging::init(config.log_level(), config.log_format());

    let hosts_path = cli
        .hosts
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.checks.hosts_file));
    let doc = HostsDocument::load(&hosts_path)?;
    tracing::info!(path = %hosts_path.display(), hosts = doc.hosts.len(), "Host inventory loaded");

    if cli.once {
        let runner = Runner::new(&config, &doc, None);
        let observations = runner.run_round().await;
        println!("{}", serde_json::to_string_pretty(&observations)?);
        return Ok(());
    }

    let metrics = config
        .metrics
        .enabled
        .then(|| Arc::new(MetricsRegistry::new()));
    let runner = Arc::new(Runner::new(&config, &doc, metrics.clone()));

    if let Some(registry) = metrics {
        let server = StatusServer::new(
            registry,
            runner.observations(),
            config.metrics.listen_addr.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "Status server failed");
            }
        });
    }

    tokio::select! {
        _ = runner.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for ctrl-c")?;
            tracing::info!("Received shutdown signal");
            runner.stop();
        }
    }

    Ok(())
}
