//! Operator status reporting
//!
//! Reconcilers report through [`StatusReporter`]. [`StatusManager`] records
//! degraded domains and per-workload rollout state in the health registry.

use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::models::{ManagedResourceRef, ResourceKind};
use crate::orchestrator::{async_trait, Orchestrator};
use crate::table::ManagedResourceTable;
use kube::api::DynamicObject;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Area of the operator a degraded condition belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusDomain {
    /// Applying managed workloads
    OperatorConfig,
    /// Crash-loop pod remediation
    PodRemediation,
}

impl StatusDomain {
    pub fn component(&self) -> &'static str {
        match self {
            StatusDomain::OperatorConfig => components::OPERATOR_CONFIG,
            StatusDomain::PodRemediation => components::POD_REMEDIATION,
        }
    }
}

impl fmt::Display for StatusDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.component())
    }
}

/// Sink for operator status updates
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Refresh workload status from the current cluster state
    async fn set_from_pods(&self);

    async fn set_degraded(&self, domain: StatusDomain, reason: &str, message: &str);

    async fn clear_degraded(&self, domain: StatusDomain);
}

/// Rollout state of a workload derived from its status block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutState {
    Available,
    Progressing(String),
    Missing,
}

/// Derive rollout state from a Deployment or DaemonSet object
pub fn rollout_state(kind: ResourceKind, obj: &DynamicObject) -> RolloutState {
    let status = obj.data.get("status").cloned().unwrap_or(Value::Null);
    let field = |name: &str| status.get(name).and_then(Value::as_i64).unwrap_or(0);

    match kind {
        ResourceKind::DaemonSet => {
            let desired = field("desiredNumberScheduled");
            let unavailable = field("numberUnavailable");
            let updated = field("updatedNumberScheduled");
            if unavailable > 0 {
                RolloutState::Progressing(format!(
                    "{} of {} pods unavailable",
                    unavailable, desired
                ))
            } else if updated < desired {
                RolloutState::Progressing(format!("{} of {} pods updated", updated, desired))
            } else {
                RolloutState::Available
            }
        }
        ResourceKind::Deployment => {
            let replicas = field("replicas");
            let unavailable = field("unavailableReplicas");
            let updated = field("updatedReplicas");
            if unavailable > 0 {
                RolloutState::Progressing(format!(
                    "{} of {} replicas unavailable",
                    unavailable, replicas
                ))
            } else if updated < replicas {
                RolloutState::Progressing(format!("{} of {} replicas updated", updated, replicas))
            } else {
                RolloutState::Available
            }
        }
    }
}

/// Status reporter backed by the health registry
pub struct StatusManager {
    health: HealthRegistry,
    orchestrator: Arc<dyn Orchestrator>,
    table: Arc<ManagedResourceTable>,
}

impl StatusManager {
    pub fn new(
        health: HealthRegistry,
        orchestrator: Arc<dyn Orchestrator>,
        table: Arc<ManagedResourceTable>,
    ) -> Self {
        Self {
            health,
            orchestrator,
            table,
        }
    }

    /// Register the status components with an initial healthy state
    pub async fn register_components(&self) {
        self.health.register(components::OPERATOR_CONFIG).await;
        self.health.register(components::POD_REMEDIATION).await;
        for entry in self.table.entries() {
            self.health
                .register(&components::workload(&entry.reference.name))
                .await;
        }
    }

    async fn record_rollout(&self, resource: &ManagedResourceRef, state: RolloutState) {
        let name = components::workload(&resource.name);
        let health = match state {
            RolloutState::Available => ComponentHealth::healthy(),
            RolloutState::Progressing(message) => ComponentHealth::healthy().progressing(message),
            RolloutState::Missing => {
                ComponentHealth::degraded(format!("{} not found", resource)).with_reason("NotFound")
            }
        };
        self.health.update(&name, health).await;
    }
}

#[async_trait]
impl StatusReporter for StatusManager {
    async fn set_from_pods(&self) {
        for entry in self.table.entries() {
            let resource = &entry.reference;
            match self.orchestrator.get(resource).await {
                Ok(Some(obj)) => {
                    let state = rollout_state(resource.kind, &obj);
                    debug!(resource = %resource, state = ?state, "Workload status");
                    self.record_rollout(resource, state).await;
                }
                Ok(None) => self.record_rollout(resource, RolloutState::Missing).await,
                Err(e) => {
                    debug!(resource = %resource, error = %e, "Could not read workload status");
                }
            }
        }
    }

    async fn set_degraded(&self, domain: StatusDomain, reason: &str, message: &str) {
        warn!(domain = %domain, reason = %reason, message = %message, "Operator degraded");
        self.health
            .update(
                domain.component(),
                ComponentHealth::degraded(message).with_reason(reason),
            )
            .await;
    }

    async fn clear_degraded(&self, domain: StatusDomain) {
        self.health.set_healthy(domain.component()).await;
    }
}
