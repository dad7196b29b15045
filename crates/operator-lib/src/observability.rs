//! Observability infrastructure for the operator
//!
//! Provides:
//! - Prometheus metrics (reconcile latency and results, recreations, pod remediation, queue depth)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for reconcile latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OperatorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct OperatorMetricsInner {
    reconcile_latency_seconds: Histogram,
    reconciliations: IntCounterVec,
    resources_recreated: IntCounterVec,
    pods_remediated: IntCounter,
    pod_deletion_failures: IntCounter,
    queue_depth: IntGauge,
}

impl OperatorMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_latency_seconds: register_histogram!(
                "ncp_operator_reconcile_latency_seconds",
                "Time spent in a single reconciliation",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_latency_seconds"),

            reconciliations: register_int_counter_vec!(
                "ncp_operator_reconciliations_total",
                "Reconciliations by result",
                &["result"]
            )
            .expect("Failed to register reconciliations_total"),

            resources_recreated: register_int_counter_vec!(
                "ncp_operator_resources_recreated_total",
                "Managed resources recreated after deletion",
                &["kind", "name"]
            )
            .expect("Failed to register resources_recreated_total"),

            pods_remediated: register_int_counter!(
                "ncp_operator_pods_remediated_total",
                "Crash-looping pods deleted for remediation"
            )
            .expect("Failed to register pods_remediated_total"),

            pod_deletion_failures: register_int_counter!(
                "ncp_operator_pod_deletion_failures_total",
                "Failed deletions of crash-looping pods"
            )
            .expect("Failed to register pod_deletion_failures_total"),

            queue_depth: register_int_gauge!(
                "ncp_operator_queue_depth",
                "Keys waiting in the reconcile queue"
            )
            .expect("Failed to register queue_depth"),
        }
    }
}

/// Operator metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct OperatorMetrics {
    _private: (),
}

impl Default for OperatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OperatorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OperatorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_reconcile_latency(&self, duration_secs: f64) {
        self.inner().reconcile_latency_seconds.observe(duration_secs);
    }

    /// Count a reconciliation; `result` is `success`, `skipped` or an error kind
    pub fn inc_reconciliations(&self, result: &str) {
        self.inner()
            .reconciliations
            .with_label_values(&[result])
            .inc();
    }

    pub fn reconciliations(&self, result: &str) -> u64 {
        self.inner().reconciliations.with_label_values(&[result]).get()
    }

    pub fn inc_resources_recreated(&self, kind: &str, name: &str) {
        self.inner()
            .resources_recreated
            .with_label_values(&[kind, name])
            .inc();
    }

    pub fn add_pods_remediated(&self, count: u64) {
        self.inner().pods_remediated.inc_by(count);
    }

    pub fn add_pod_deletion_failures(&self, count: u64) {
        self.inner().pod_deletion_failures.inc_by(count);
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.inner().queue_depth.set(depth);
    }
}

/// Structured logger for operator events
///
/// Emits `event = "..."` records for lifecycle and remediation events.
#[derive(Clone)]
pub struct StructuredLogger {
    namespace: String,
}

impl StructuredLogger {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn log_startup(&self, version: &str, managed_resources: usize) {
        info!(
            event = "operator_started",
            namespace = %self.namespace,
            operator_version = %version,
            managed_resources = managed_resources,
            "NCP operator started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "operator_shutdown",
            namespace = %self.namespace,
            reason = %reason,
            "NCP operator shutting down"
        );
    }

    pub fn log_recreated(&self, kind: &str, name: &str) {
        warn!(
            event = "resource_recreated",
            namespace = %self.namespace,
            kind = %kind,
            name = %name,
            "Managed resource was missing and has been recreated"
        );
    }

    pub fn log_remediation(&self, workload: &str, deleted: &[String], failed: usize) {
        if failed == 0 {
            info!(
                event = "pods_remediated",
                namespace = %self.namespace,
                workload = %workload,
                deleted = ?deleted,
                "Restarted crash-looping pods"
            );
        } else {
            warn!(
                event = "pods_remediation_incomplete",
                namespace = %self.namespace,
                workload = %workload,
                deleted = ?deleted,
                failed = failed,
                "Some crash-looping pods could not be restarted"
            );
        }
    }
}
