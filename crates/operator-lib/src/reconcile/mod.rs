//! Reconciliation of the managed workloads
//!
//! - Drift detection and recreation of deleted workloads
//! - Crash-loop remediation for pods with a stale resolver configuration
//! - Dispatch of a single key through both phases

mod dispatcher;
mod drift;
mod remediation;

pub use dispatcher::{Action, ReconciliationDispatcher, DEFAULT_RESYNC_INTERVAL};
pub use drift::{DriftReconciler, ReconcileOutcome};
pub use remediation::{CandidatePod, CrashLoopRemediator, RemediationBatchResult};
