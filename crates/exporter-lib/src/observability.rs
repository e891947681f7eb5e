//! Observability infrastructure for the power exporter
//!
//! Provides:
//! - Prometheus self-metrics (cycle latency, nodes estimated, skips by reason, state)
//! - Structured JSON logging with tracing

use crate::error::ExporterError;
use crate::health::ExporterState;
use crate::models::PowerEstimate;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for cycle duration (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ExporterMetricsInner> = OnceLock::new();

struct ExporterMetricsInner {
    cycle_duration_seconds: Histogram,
    cycles: IntCounter,
    nodes_estimated: IntGauge,
    nodes_skipped: IntCounterVec,
    query_errors: IntCounter,
    state: IntGauge,
}

impl ExporterMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "node_power_exporter_cycle_duration_seconds",
                "Time spent collecting, reconciling and estimating in one cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            cycles: register_int_counter!(
                "node_power_exporter_cycles_total",
                "Total number of estimation cycles run"
            )
            .expect("Failed to register cycles_total"),

            nodes_estimated: register_int_gauge!(
                "node_power_exporter_nodes_estimated",
                "Number of nodes with a published estimate in the last cycle"
            )
            .expect("Failed to register nodes_estimated"),

            nodes_skipped: register_int_counter_vec!(
                "node_power_exporter_nodes_skipped_total",
                "Nodes left out of a cycle, by reason",
                &["reason"]
            )
            .expect("Failed to register nodes_skipped_total"),

            query_errors: register_int_counter!(
                "node_power_exporter_query_errors_total",
                "Metrics backend queries that failed or returned no usable value"
            )
            .expect("Failed to register query_errors_total"),

            state: register_int_gauge!(
                "node_power_exporter_state",
                "Exporter state (0 unconnected, 1 connected, 2 polling, 3 idle, 4 fatal)"
            )
            .expect("Failed to register state"),
        }
    }
}

/// Exporter self-metrics
///
/// Lightweight handle to the global metrics instance; clones share it.
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
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ExporterMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_cycle(&self, duration_secs: f64, nodes_estimated: usize) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
        self.inner().cycles.inc();
        self.inner().nodes_estimated.set(nodes_estimated as i64);
    }

    /// Count a node left out of the cycle
    pub fn inc_skipped(&self, reason: &str) {
        self.inner().nodes_skipped.with_label_values(&[reason]).inc();
    }

    pub fn inc_query_errors(&self, count: usize) {
        self.inner().query_errors.inc_by(count as u64);
    }

    pub fn set_state(&self, state: ExporterState) {
        self.inner().state.set(state as i64);
    }
}

/// Structured logger for exporter events
///
/// Every line carries an `event` field and the metrics backend endpoint.
#[derive(Clone)]
pub struct StructuredLogger {
    backend: String,
}

impl StructuredLogger {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }

    pub fn log_startup(&self, version: &str, instance_types: usize, interval_secs: u64) {
        info!(
            event = "exporter_started",
            backend = %self.backend,
            exporter_version = %version,
            instance_types = instance_types,
            interval_secs = interval_secs,
            "Node power exporter started"
        );
    }

    pub fn log_estimate(
        &self,
        instance: &str,
        node_name: &str,
        instance_type: &str,
        region: &str,
        cpu_load: f64,
        mem_load: f64,
        estimate: &PowerEstimate,
    ) {
        debug!(
            event = "power_estimated",
            backend = %self.backend,
            instance = %instance,
            node_name = %node_name,
            instance_type = %instance_type,
            region = %region,
            cpu_load = cpu_load,
            mem_load = mem_load,
            cpu_watts = estimate.cpu_watts,
            mem_watts = estimate.mem_watts,
            total_watts = estimate.total_watts,
            "Estimated node power usage"
        );
    }

    /// Log a node excluded from this cycle
    pub fn log_node_skipped(&self, instance: &str, instance_type: Option<&str>, error: &ExporterError) {
        warn!(
            event = "node_skipped",
            backend = %self.backend,
            instance = %instance,
            instance_type = instance_type.unwrap_or(""),
            reason = error.code(),
            error = %error,
            "Node skipped this cycle"
        );
    }

    pub fn log_cycle(&self, instances: usize, published: usize, skipped: usize, elapsed_ms: u128) {
        info!(
            event = "cycle_complete",
            backend = %self.backend,
            instances = instances,
            published = published,
            skipped = skipped,
            elapsed_ms = elapsed_ms as u64,
            "Estimation cycle complete"
        );
    }

    pub fn log_state(&self, from: ExporterState, to: ExporterState) {
        debug!(
            event = "state_changed",
            backend = %self.backend,
            from = from.as_str(),
            to = to.as_str(),
            "Exporter state changed"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            backend = %self.backend,
            reason = %reason,
            "Node power exporter shutting down"
        );
    }
}
