//! Access to the cluster API
//!
//! The reconcilers talk to the cluster only through [`Orchestrator`], so they
//! can be exercised against an in-memory implementation in tests.

mod client;

pub use client::{KubeOrchestrator, FIELD_MANAGER};

use crate::models::{ManagedResourceRef, PodIdentity, ResourceKind};
use crate::table::PodDeletion;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;

pub use async_trait::async_trait;

/// Result of a cluster API call
pub type ApiResult<T> = std::result::Result<T, kube::Error>;

/// Cluster operations used by reconciliation
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Point read of a managed resource; `Ok(None)` when it does not exist
    async fn get(&self, resource: &ManagedResourceRef) -> ApiResult<Option<DynamicObject>>;

    /// Create or update `object` as a `kind`
    async fn apply(&self, kind: ResourceKind, object: &DynamicObject) -> ApiResult<()>;

    /// List pods in `namespace` matching a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> ApiResult<Vec<Pod>>;

    /// Last `lines` lines of the previous run of `container` in `pod`
    async fn previous_log_tail(
        &self,
        pod: &PodIdentity,
        container: &str,
        lines: i64,
    ) -> ApiResult<String>;

    /// Delete a pod
    async fn delete_pod(&self, pod: &PodIdentity, deletion: &PodDeletion) -> ApiResult<()>;
}
