//! Kubernetes implementation of the orchestrator interface

use super::{async_trait, ApiResult, Orchestrator};
use crate::models::{ManagedResourceRef, PodIdentity, ResourceKind};
use crate::table::{Cascade, PodDeletion};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, LogParams, Patch, PatchParams,
    PropagationPolicy,
};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "ncp-operator";

/// Orchestrator backed by a kube client
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
}

impl KubeOrchestrator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn delete_params(deletion: &PodDeletion) -> DeleteParams {
    let policy = match deletion.cascade {
        Cascade::Foreground => PropagationPolicy::Foreground,
        Cascade::Background => PropagationPolicy::Background,
        Cascade::Orphan => PropagationPolicy::Orphan,
    };
    DeleteParams {
        grace_period_seconds: Some(deletion.grace_period_secs),
        propagation_policy: Some(policy),
        ..DeleteParams::default()
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn get(&self, resource: &ManagedResourceRef) -> ApiResult<Option<DynamicObject>> {
        self.dynamic_api(resource.kind, &resource.namespace)
            .get_opt(&resource.name)
            .await
    }

    async fn apply(&self, kind: ResourceKind, object: &DynamicObject) -> ApiResult<()> {
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();

        // Server-side apply rejects these server-populated fields
        let mut object = object.clone();
        object.metadata.resource_version = None;
        object.metadata.managed_fields = None;
        object.metadata.uid = None;
        object.metadata.creation_timestamp = None;

        debug!(kind = %kind, namespace = %namespace, name = %name, "Applying object");
        self.dynamic_api(kind, &namespace)
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&object),
            )
            .await?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> ApiResult<Vec<Pod>> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn previous_log_tail(
        &self,
        pod: &PodIdentity,
        container: &str,
        lines: i64,
    ) -> ApiResult<String> {
        let params = LogParams {
            container: Some(container.to_string()),
            previous: true,
            tail_lines: Some(lines),
            ..LogParams::default()
        };
        self.pods(&pod.namespace).logs(&pod.name, &params).await
    }

    async fn delete_pod(&self, pod: &PodIdentity, deletion: &PodDeletion) -> ApiResult<()> {
        self.pods(&pod.namespace)
            .delete(&pod.name, &delete_params(deletion))
            .await?;
        Ok(())
    }
}
