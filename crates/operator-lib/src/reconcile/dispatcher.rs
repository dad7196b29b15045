//! Per-key reconciliation entry point
//!
//! Filters the key against the managed table, refreshes status, then runs the
//! drift phase and, for workloads with a crash-loop policy, the remediation
//! phase. Drift effects are fully applied before remediation starts.

use super::{CrashLoopRemediator, DriftReconciler};
use crate::error::ReconcileError;
use crate::models::ObjectKey;
use crate::observability::{OperatorMetrics, StructuredLogger};
use crate::status::{StatusDomain, StatusReporter};
use crate::table::{ManagedResource, ManagedResourceTable};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Periodic re-check interval, independent of change notifications
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// What the caller should do with the key after a successful dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Not a managed resource; nothing to schedule
    Done,
    /// Check again after the given delay
    RequeueAfter(Duration),
}

pub struct ReconciliationDispatcher {
    table: Arc<ManagedResourceTable>,
    drift: DriftReconciler,
    remediator: CrashLoopRemediator,
    status: Arc<dyn StatusReporter>,
    metrics: OperatorMetrics,
    logger: StructuredLogger,
    resync_interval: Duration,
}

impl ReconciliationDispatcher {
    pub fn new(
        table: Arc<ManagedResourceTable>,
        drift: DriftReconciler,
        remediator: CrashLoopRemediator,
        status: Arc<dyn StatusReporter>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            table,
            drift,
            remediator,
            status,
            metrics: OperatorMetrics::new(),
            logger,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
        }
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    pub fn table(&self) -> &ManagedResourceTable {
        &self.table
    }

    /// Reconcile one key. Errors ask the caller to retry.
    pub async fn dispatch(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let entry = match self.table.lookup(key) {
            Some(entry) => entry,
            None => {
                debug!(key = %key, "Ignoring unmanaged resource");
                self.metrics.inc_reconciliations("skipped");
                return Ok(Action::Done);
            }
        };

        info!(namespace = %key.namespace, name = %key.name, "Reconciling pod update");
        let start = Instant::now();

        let result = self.run_phases(entry).await;

        self.metrics
            .observe_reconcile_latency(start.elapsed().as_secs_f64());
        match &result {
            Ok(_) => self.metrics.inc_reconciliations("success"),
            Err(e) => {
                self.metrics.inc_reconciliations(e.kind().as_str());
                self.report(e).await;
            }
        }

        result.map(|_| Action::RequeueAfter(self.resync_interval))
    }

    async fn run_phases(&self, entry: &ManagedResource) -> Result<(), ReconcileError> {
        let resource = &entry.reference;
        self.status.set_from_pods().await;

        let outcome = self.drift.reconcile(resource).await?;
        if outcome.recreated {
            self.metrics
                .inc_resources_recreated(resource.kind.as_str(), &resource.name);
            self.logger.log_recreated(resource.kind.as_str(), &resource.name);
        }
        // A lookup or apply failure of an earlier pass is resolved once drift succeeds
        self.status.clear_degraded(StatusDomain::OperatorConfig).await;

        if let Some(policy) = &entry.remediation {
            let batch = self.remediator.remediate(resource, policy).await;
            match &batch {
                Ok(result) if !result.attempted.is_empty() => {
                    let deleted: Vec<String> = result.deleted().map(|p| p.to_string()).collect();
                    self.metrics.add_pods_remediated(deleted.len() as u64);
                    self.logger.log_remediation(&resource.name, &deleted, 0);
                }
                Err(ReconcileError::PodDeletion { deleted, failed }) => {
                    let deleted: Vec<String> = deleted.iter().map(|p| p.to_string()).collect();
                    self.metrics.add_pods_remediated(deleted.len() as u64);
                    self.metrics.add_pod_deletion_failures(failed.len() as u64);
                    self.logger
                        .log_remediation(&resource.name, &deleted, failed.len());
                }
                _ => {}
            }
            batch?;
            self.status.clear_degraded(StatusDomain::PodRemediation).await;
        }

        Ok(())
    }

    async fn report(&self, err: &ReconcileError) {
        match err.degraded_reason() {
            Some((domain, reason)) => {
                warn!(error = %err, kind = err.kind().as_str(), "Reconciliation failed");
                self.status
                    .set_degraded(domain, reason, &err.to_string())
                    .await;
            }
            None => {
                info!(error = %err, "Waiting for operator configuration");
            }
        }
    }
}
