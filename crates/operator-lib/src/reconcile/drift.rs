//! Recreation of deleted managed workloads

use crate::desired::DesiredSpecProvider;
use crate::error::ReconcileError;
use crate::models::ManagedResourceRef;
use crate::orchestrator::Orchestrator;
use crate::ownership::set_controller_reference;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one drift check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub resource: ManagedResourceRef,
    pub existed: bool,
    pub recreated: bool,
}

/// Recreates a managed workload from its desired spec when it is missing
pub struct DriftReconciler {
    orchestrator: Arc<dyn Orchestrator>,
    specs: Arc<dyn DesiredSpecProvider>,
}

impl DriftReconciler {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, specs: Arc<dyn DesiredSpecProvider>) -> Self {
        Self {
            orchestrator,
            specs,
        }
    }

    pub async fn reconcile(
        &self,
        resource: &ManagedResourceRef,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let existing = self
            .orchestrator
            .get(resource)
            .await
            .map_err(|source| ReconcileError::Lookup {
                resource: resource.clone(),
                source,
            })?;

        if existing.is_some() {
            info!(resource = %resource, "Resource already exists");
            return Ok(ReconcileOutcome {
                resource: resource.clone(),
                existed: true,
                recreated: false,
            });
        }

        info!(resource = %resource, "Resource does not exist. It will be recreated");
        self.recreate(resource).await?;
        info!(resource = %resource, "Recreated resource");

        Ok(ReconcileOutcome {
            resource: resource.clone(),
            existed: false,
            recreated: true,
        })
    }

    async fn recreate(&self, resource: &ManagedResourceRef) -> Result<(), ReconcileError> {
        let owner = self.specs.owner().ok_or_else(|| {
            ReconcileError::ConfigNotReady(
                "network configuration owner not available yet".to_string(),
            )
        })?;
        let mut desired = self.specs.desired_spec(&resource.name).ok_or_else(|| {
            ReconcileError::ConfigNotReady(format!("{} spec not rendered yet", resource.name))
        })?;

        set_controller_reference(&owner, &mut desired).map_err(|source| {
            ReconcileError::Ownership {
                resource: resource.clone(),
                source,
            }
        })?;

        self.orchestrator
            .apply(resource.kind, &desired)
            .await
            .map_err(|source| {
                warn!(resource = %resource, error = %source, "Failed to recreate resource");
                ReconcileError::Apply {
                    resource: resource.clone(),
                    source,
                }
            })
    }
}
