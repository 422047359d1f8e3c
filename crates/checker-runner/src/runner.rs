//! Fans check rounds out over every configured endpoint.

use crate::config::Config;
use crate::hosts::{HostRecord, HostsDocument, Target, to_endpoints};
use crate::metrics::MetricsRegistry;
use checker::{BackendKind, CheckResult, Detail, ErrorKind, Harness, Probe, ProbeContext, registry};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{Instrument, debug, info, info_span, warn};

/// What the runner records for one endpoint after each attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub label: &'static str,
    /// Instance uuid
    pub host: String,
    pub address: String,
    pub datacenter: Option<String>,
    pub ok: bool,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
    pub detail: Option<Detail>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(with = "humantime_serde")]
    pub observed_at: SystemTime,
}

impl Observation {
    fn new(label: &'static str, host: &HostRecord, address: String, result: CheckResult) -> Self {
        Self {
            label,
            host: host.uuid.clone(),
            address,
            datacenter: host.datacenter.clone(),
            ok: result.ok,
            error_kind: result.error_kind,
            message: result.message,
            detail: result.detail,
            duration: result.duration,
            observed_at: SystemTime::now(),
        }
    }

    /// Key the observation is stored under
    pub fn key(&self) -> String {
        format!("{}/{}", self.host, self.label)
    }
}

/// Latest observation per endpoint, shared with the status server
pub type Observations = Arc<DashMap<String, Observation>>;

struct Checked {
    host: HostRecord,
    kind: BackendKind,
    address: String,
    probe: Arc<dyn Probe>,
}

/// Runs every endpoint's probe through the harness, round after round
pub struct Runner {
    harness: Harness,
    interval: Duration,
    checked: Vec<Checked>,
    observations: Observations,
    metrics: Option<Arc<MetricsRegistry>>,
    stop_signal: Arc<Notify>,
}

impl Runner {
    /// Build one probe per endpoint in `doc`.
    ///
    /// Endpoints whose configuration is rejected are logged and left out.
    pub fn new(config: &Config, doc: &HostsDocument, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        let targets = to_endpoints(doc, config);
        let total = targets.len();

        let checked: Vec<_> = targets
            .into_iter()
            .filter_map(|Target { host, endpoint }| {
                let kind = endpoint.kind;
                let address = endpoint.target();
                let span = info_span!("endpoint", host = %host.uuid, role = %host.host_type);
                match registry::build_probe(endpoint, ProbeContext::default().with_span(span)) {
                    Ok(probe) => Some(Checked {
                        host,
                        kind,
                        address,
                        probe,
                    }),
                    Err(e) => {
                        warn!(host = %host.uuid, %address, error = %e, "Skipping misconfigured endpoint");
                        None
                    }
                }
            })
            .collect();

        info!(
            endpoints = checked.len(),
            skipped = total - checked.len(),
            deadline = ?config.checks.deadline,
            "Checker runner initialized"
        );
        if let Some(metrics) = &metrics {
            metrics.set_endpoints(checked.len());
        }

        Self {
            harness: Harness::new(config.checks.deadline),
            interval: config.checks.interval,
            checked,
            observations: Arc::new(DashMap::new()),
            metrics,
            stop_signal: Arc::new(Notify::new()),
        }
    }

    /// Number of endpoints checked each round
    pub fn len(&self) -> usize {
        self.checked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checked.is_empty()
    }

    /// Shared handle on the latest observations
    pub fn observations(&self) -> Observations {
        self.observations.clone()
    }

    /// Check every endpoint once, concurrently, and return the observations
    /// in inventory order
    pub async fn run_round(&self) -> Vec<Observation> {
        let started = Instant::now();

        let attempts = self.checked.iter().map(|c| {
            let span = info_span!("attempt", host = %c.host.uuid, address = %c.address);
            self.harness.run(c.probe.clone()).instrument(span)
        });
        let results = join_all(attempts).await;

        let mut unhealthy = [0usize; 4];
        let observations: Vec<_> = self
            .checked
            .iter()
            .zip(results)
            .map(|(c, result)| {
                if let Some(metrics) = &self.metrics {
                    metrics.record_check(c.kind, &result);
                }
                if !result.ok {
                    unhealthy[kind_index(c.kind)] += 1;
                }
                Observation::new(c.kind.label(), &c.host, c.address.clone(), result)
            })
            .collect();

        for observation in &observations {
            self.observations.insert(observation.key(), observation.clone());
        }

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            for kind in BackendKind::ALL {
                metrics.set_unhealthy(kind, unhealthy[kind_index(kind)]);
            }
            metrics.record_round(elapsed);
        }
        debug!(
            endpoints = observations.len(),
            unhealthy = unhealthy.iter().sum::<usize>(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Check round complete"
        );

        observations
    }

    /// Run rounds every interval until [`Runner::stop`] is called
    pub async fn run(&self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_round().await;
                }
                _ = self.stop_signal.notified() => {
                    info!("Checker runner stopping");
                    break;
                }
            }
        }
    }

    pub fn stop(&self) {
        self.stop_signal.notify_one();
    }
}

fn kind_index(kind: BackendKind) -> usize {
    match kind {
        BackendKind::Moray => 0,
        BackendKind::Postgres => 1,
        BackendKind::Redis => 2,
        BackendKind::Zookeeper => 3,
    }
}
