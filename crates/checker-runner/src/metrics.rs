//! Prometheus metrics for the checker runner.

use checker::{BackendKind, CheckResult};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for per-kind metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    /// Backend kind (moray, postgres, redis, zookeeper)
    pub kind: String,
}

/// Labels for check result metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CheckLabels {
    /// Backend kind (moray, postgres, redis, zookeeper)
    pub kind: String,
    /// Result (ok, connection_error, protocol_error, timeout)
    pub result: String,
}

/// Metrics registry with all checker metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    /// Total attempts by outcome
    checks_total: Family<CheckLabels, Counter>,
    /// Attempt duration
    check_duration_seconds: Family<KindLabels, Histogram>,
    /// Endpoints currently unhealthy
    unhealthy: Family<KindLabels, Gauge>,
    /// Endpoints being checked
    endpoints: Gauge,
    /// Completed rounds
    rounds_total: Counter,
    /// Round duration
    round_duration_seconds: Histogram,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let checks_total = Family::<CheckLabels, Counter>::default();
        registry.register(
            "madtom_checks",
            "Total health check attempts",
            checks_total.clone(),
        );

        let check_duration_seconds =
            Family::<KindLabels, Histogram>::new_with_constructor(|| {
                // 1ms to ~16s
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "madtom_check_duration_seconds",
            "Health check attempt duration in seconds",
            check_duration_seconds.clone(),
        );

        let unhealthy = Family::<KindLabels, Gauge>::default();
        registry.register(
            "madtom_unhealthy_endpoints",
            "Endpoints whose last attempt failed",
            unhealthy.clone(),
        );

        let endpoints = Gauge::default();
        registry.register(
            "madtom_endpoints",
            "Number of endpoints being checked",
            endpoints.clone(),
        );

        let rounds_total = Counter::default();
        registry.register(
            "madtom_rounds",
            "Total check rounds completed",
            rounds_total.clone(),
        );

        let round_duration_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 12));
        registry.register(
            "madtom_round_duration_seconds",
            "Check round duration in seconds",
            round_duration_seconds.clone(),
        );

        Self {
            registry,
            checks_total,
            check_duration_seconds,
            unhealthy,
            endpoints,
            rounds_total,
            round_duration_seconds,
        }
    }

    /// Record one attempt's result
    pub fn record_check(&self, kind: BackendKind, result: &CheckResult) {
        self.checks_total
            .get_or_create(&CheckLabels {
                kind: kind.label().to_string(),
                result: result_label(result).to_string(),
            })
            .inc();

        self.check_duration_seconds
            .get_or_create(&KindLabels {
                kind: kind.label().to_string(),
            })
            .observe(result.duration.as_secs_f64());
    }

    /// Set the number of failing endpoints of `kind`
    pub fn set_unhealthy(&self, kind: BackendKind, count: usize) {
        self.unhealthy
            .get_or_create(&KindLabels {
                kind: kind.label().to_string(),
            })
            .set(count as i64);
    }

    pub fn set_endpoints(&self, count: usize) {
        self.endpoints.set(count as i64);
    }

    pub fn record_round(&self, duration: Duration) {
        self.rounds_total.inc();
        self.round_duration_seconds.observe(duration.as_secs_f64());
    }
}

fn result_label(result: &CheckResult) -> &'static str {
    match result.error_kind {
        None => "ok",
        Some(kind) => kind.as_str(),
    }
}
