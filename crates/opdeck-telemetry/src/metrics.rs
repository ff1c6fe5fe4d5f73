//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges an operation store updates on each
//!   lifecycle transition.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared by operation stores.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    operations_started_total: IntCounterVec,
    operations_finished_total: IntCounterVec,
    guard_rejections_total: IntCounterVec,
    status_polls_total: IntCounterVec,
    progress_regressions_total: IntCounter,
    active_operations: IntGauge,
}

/// Snapshot of selected gauges and counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Operations currently requesting or polling.
    pub active_operations: i64,
    /// Status responses whose progress went backwards and was clamped.
    pub progress_regressions_total: u64,
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations_started_total = counter_vec(
            "operations_started_total",
            "Operations accepted by the action guard",
            &["kind"],
        )?;
        let operations_finished_total = counter_vec(
            "operations_finished_total",
            "Operations that left the active set, by outcome",
            &["kind", "outcome"],
        )?;
        let guard_rejections_total = counter_vec(
            "guard_rejections_total",
            "Start requests refused because a conflicting operation was active",
            &["kind"],
        )?;
        let status_polls_total = counter_vec(
            "status_polls_total",
            "Status fetches performed by pollers, by result",
            &["result"],
        )?;
        let progress_regressions_total = IntCounter::with_opts(Opts::new(
            "progress_regressions_total",
            "Status responses whose progress was lower than already shown",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "progress_regressions_total",
            source,
        })?;
        let active_operations = IntGauge::with_opts(Opts::new(
            "active_operations",
            "Operations currently requesting or polling",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "active_operations",
            source,
        })?;

        register(&registry, "operations_started_total", &operations_started_total)?;
        register(
            &registry,
            "operations_finished_total",
            &operations_finished_total,
        )?;
        register(&registry, "guard_rejections_total", &guard_rejections_total)?;
        register(&registry, "status_polls_total", &status_polls_total)?;
        register(
            &registry,
            "progress_regressions_total",
            &progress_regressions_total,
        )?;
        register(&registry, "active_operations", &active_operations)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                operations_started_total,
                operations_finished_total,
                guard_rejections_total,
                status_polls_total,
                progress_regressions_total,
                active_operations,
            }),
        })
    }

    /// Record an accepted start for `kind`.
    pub fn inc_started(&self, kind: &str) {
        self.inner
            .operations_started_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Record an operation leaving the active set with `outcome`.
    pub fn inc_finished(&self, kind: &str, outcome: &str) {
        self.inner
            .operations_finished_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Record a start refused by the guard.
    pub fn inc_guard_rejection(&self, kind: &str) {
        self.inner
            .guard_rejections_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Record one status fetch (`ok` or `error`).
    pub fn inc_status_poll(&self, result: &str) {
        self.inner
            .status_polls_total
            .with_label_values(&[result])
            .inc();
    }

    /// Record a clamped progress regression.
    pub fn inc_progress_regression(&self) {
        self.inner.progress_regressions_total.inc();
    }

    /// Set the active operation gauge.
    pub fn set_active_operations(&self, count: usize) {
        self.inner
            .active_operations
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Current value of `operations_started_total` for `kind`.
    #[must_use]
    pub fn started(&self, kind: &str) -> u64 {
        self.inner
            .operations_started_total
            .with_label_values(&[kind])
            .get()
    }

    /// Current value of `operations_finished_total` for `kind` and `outcome`.
    #[must_use]
    pub fn finished(&self, kind: &str, outcome: &str) -> u64 {
        self.inner
            .operations_finished_total
            .with_label_values(&[kind, outcome])
            .get()
    }

    /// Current value of `guard_rejections_total` for `kind`.
    #[must_use]
    pub fn guard_rejections(&self, kind: &str) -> u64 {
        self.inner
            .guard_rejections_total
            .with_label_values(&[kind])
            .get()
    }

    /// Current value of `status_polls_total` for `result`.
    #[must_use]
    pub fn status_polls(&self, result: &str) -> u64 {
        self.inner
            .status_polls_total
            .with_label_values(&[result])
            .get()
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_operations: self.inner.active_operations.get(),
            progress_regressions_total: self.inner.progress_regressions_total.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> anyhow::Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_started("install");
        metrics.inc_started("install");
        metrics.inc_finished("install", "completed");
        metrics.inc_guard_rejection("install");
        metrics.inc_guard_rejection("launch");
        metrics.inc_status_poll("ok");
        metrics.inc_progress_regression();
        metrics.set_active_operations(1);

        assert_eq!(metrics.started("install"), 2);
        assert_eq!(metrics.finished("install", "completed"), 1);
        assert_eq!(metrics.status_polls("ok"), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_operations, 1);
        assert_eq!(snapshot.progress_regressions_total, 1);
        assert_eq!(metrics.guard_rejections("install"), 1);
        assert_eq!(metrics.guard_rejections("launch"), 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("operations_started_total"));
        assert!(rendered.contains("outcome=\"completed\""));
        assert!(rendered.contains("active_operations 1"));
        Ok(())
    }

    #[test]
    fn registries_are_independent() -> anyhow::Result<()> {
        let first = Metrics::new()?;
        let second = Metrics::new()?;
        first.inc_started("run");
        assert_eq!(second.started("run"), 0);
        Ok(())
    }
}
