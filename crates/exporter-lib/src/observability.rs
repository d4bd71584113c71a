//! Observability infrastructure for the exporter
//!
//! Provides:
//! - Prometheus self-metrics (cycle duration, targets, per-target errors)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, Gauge, Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for collection cycle duration (in seconds)
const CYCLE_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ExporterMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ExporterMetricsInner {
    collection_duration_seconds: Histogram,
    targets: IntGaugeVec,
    target_errors: IntCounterVec,
    cycles: IntCounter,
    discovery_errors: IntCounter,
    last_cycle_timestamp: Gauge,
}

impl ExporterMetricsInner {
    fn new() -> Self {
        Self {
            collection_duration_seconds: register_histogram!(
                "docker_exporter_collection_duration_seconds",
                "Time spent on one collection cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_duration_seconds"),

            targets: register_int_gauge_vec!(
                "docker_exporter_targets",
                "Registered targets found in the last collection cycle",
                &["kind"]
            )
            .expect("Failed to register targets"),

            target_errors: register_int_counter_vec!(
                "docker_exporter_target_errors_total",
                "Targets that contributed no metrics because sampling failed",
                &["kind", "error"]
            )
            .expect("Failed to register target_errors"),

            cycles: register_int_counter!(
                "docker_exporter_cycles_total",
                "Collection cycles that published a snapshot"
            )
            .expect("Failed to register cycles"),

            discovery_errors: register_int_counter!(
                "docker_exporter_discovery_errors_total",
                "Collection cycles whose discovery failed"
            )
            .expect("Failed to register discovery_errors"),

            last_cycle_timestamp: register_gauge!(
                "docker_exporter_last_cycle_timestamp_seconds",
                "Unix time of the last published snapshot"
            )
            .expect("Failed to register last_cycle_timestamp"),
        }
    }
}

/// Exporter self-metrics
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ExporterMetrics {
    _private: (),
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ExporterMetricsInner {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new)
    }

    /// Record a finished cycle
    pub fn observe_cycle(&self, duration_secs: f64, timestamp_secs: f64) {
        let inner = self.inner();
        inner.collection_duration_seconds.observe(duration_secs);
        inner.cycles.inc();
        inner.last_cycle_timestamp.set(timestamp_secs);
    }

    /// Update registered target counts
    pub fn set_targets(&self, kind: &str, count: i64) {
        self.inner().targets.with_label_values(&[kind]).set(count);
    }

    /// Count a failed target
    pub fn inc_target_errors(&self, kind: &str, error: &str) {
        self.inner()
            .target_errors
            .with_label_values(&[kind, error])
            .inc();
    }

    /// Count a cycle whose discovery failed
    pub fn inc_discovery_errors(&self) {
        self.inner().discovery_errors.inc();
    }
}

/// Structured logger for exporter events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log exporter startup
    pub fn log_startup(&self, version: &str, listen_port: u16, poll_interval_secs: u64) {
        info!(
            event = "exporter_started",
            instance = %self.instance,
            exporter_version = %version,
            listen_port = listen_port,
            poll_interval_secs = poll_interval_secs,
            "Docker exporter started"
        );
    }

    /// Log exporter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Docker exporter shutting down"
        );
    }

    /// Log a published snapshot
    pub fn log_cycle(
        &self,
        cycle: u64,
        containers: usize,
        volumes: usize,
        failed: usize,
        points: usize,
        elapsed_ms: u128,
    ) {
        info!(
            event = "cycle_published",
            instance = %self.instance,
            cycle = cycle,
            containers = containers,
            volumes = volumes,
            failed_targets = failed,
            points = points,
            elapsed_ms = elapsed_ms,
            "Published metric snapshot"
        );
    }

    /// Log a target that contributed nothing this cycle
    pub fn log_target_failure(&self, kind: &str, target: &str, error: &str, vanished: bool) {
        if vanished {
            debug!(
                event = "target_vanished",
                instance = %self.instance,
                kind = %kind,
                target = %target,
                "Target disappeared before it could be sampled"
            );
        } else {
            warn!(
                event = "target_failed",
                instance = %self.instance,
                kind = %kind,
                target = %target,
                error = %error,
                "Failed to sample target"
            );
        }
    }

    /// Log a cycle whose discovery failed
    pub fn log_discovery_failure(&self, error: &str) {
        warn!(
            event = "discovery_failed",
            instance = %self.instance,
            error = %error,
            "Docker discovery failed, publishing an empty snapshot"
        );
    }
}
