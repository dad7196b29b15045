//! In-memory test doubles for the reconciliation traits

use crate::desired::DesiredSpecProvider;
use crate::models::{ManagedResourceRef, PodIdentity, ResourceKind};
use crate::orchestrator::{async_trait, ApiResult, Orchestrator};
use crate::status::{StatusDomain, StatusReporter};
use crate::table::PodDeletion;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateRunning, ContainerStateWaiting, ContainerStatus, Pod, PodStatus,
};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::core::ErrorResponse;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub const NS: &str = "nsx-system";

/// Build an API error with the given HTTP status code
pub fn api_error(code: u16) -> kube::Error {
    let reason = match code {
        404 => "NotFound",
        409 => "Conflict",
        _ => "InternalError",
    };
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected {} error", code),
        reason: reason.to_string(),
        code,
    })
}

fn workload(kind: &str, name: &str) -> DynamicObject {
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": kind,
        "metadata": {"name": name, "namespace": NS},
        "spec": {"template": {"spec": {"containers": [{"name": name, "image": "nsx-ncp:latest"}]}}}
    }))
    .unwrap()
}

pub fn deployment(name: &str) -> DynamicObject {
    workload("Deployment", name)
}

pub fn daemonset(name: &str) -> DynamicObject {
    workload("DaemonSet", name)
}

pub fn network_owner() -> DynamicObject {
    let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("config.openshift.io", "v1", "Network"));
    let mut owner = DynamicObject::new("cluster", &ar);
    owner.metadata.uid = Some("network-uid".to_string());
    owner
}

/// Pod with a single container in the given state
pub fn pod(name: &str, container: &str, state: ContainerState) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some(NS.to_string());
    pod.status = Some(PodStatus {
        container_statuses: Some(vec![ContainerStatus {
            name: container.to_string(),
            state: Some(state),
            ..ContainerStatus::default()
        }]),
        ..PodStatus::default()
    });
    pod
}

pub fn waiting(reason: &str) -> ContainerState {
    ContainerState {
        waiting: Some(ContainerStateWaiting {
            reason: Some(reason.to_string()),
            message: None,
        }),
        ..ContainerState::default()
    }
}

pub fn running() -> ContainerState {
    ContainerState {
        running: Some(ContainerStateRunning::default()),
        ..ContainerState::default()
    }
}

#[derive(Default)]
struct MockState {
    objects: HashMap<(ResourceKind, String, String), DynamicObject>,
    get_errors: HashMap<String, u16>,
    apply_error: Option<u16>,
    pods: Vec<(String, Pod)>,
    logs: HashMap<String, String>,
    log_errors: HashSet<String>,
    delete_errors: HashSet<String>,

    gets: Vec<ManagedResourceRef>,
    applied: Vec<(ResourceKind, DynamicObject)>,
    pod_lists: Vec<(String, String)>,
    log_requests: Vec<(PodIdentity, String, i64)>,
    deleted: Vec<(PodIdentity, PodDeletion)>,
}

/// Orchestrator keeping objects, pods and logs in memory and recording calls
#[derive(Default)]
pub struct MockOrchestrator {
    state: Mutex<MockState>,
}

impl MockOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_object(&self, kind: ResourceKind, obj: DynamicObject) {
        let ns = obj.metadata.namespace.clone().unwrap_or_default();
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((kind, ns, name), obj);
    }

    pub fn fail_get(&self, name: &str, code: u16) {
        self.state
            .lock()
            .unwrap()
            .get_errors
            .insert(name.to_string(), code);
    }

    pub fn recover_get(&self, name: &str) {
        self.state.lock().unwrap().get_errors.remove(name);
    }

    pub fn fail_apply(&self, code: u16) {
        self.state.lock().unwrap().apply_error = Some(code);
    }

    /// Add a pod visible to list calls with `selector`
    pub fn add_pod(&self, selector: &str, pod: Pod) {
        self.state
            .lock()
            .unwrap()
            .pods
            .push((selector.to_string(), pod));
    }

    pub fn set_log(&self, pod: &str, log: &str) {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert(pod.to_string(), log.to_string());
    }

    pub fn fail_log(&self, pod: &str) {
        self.state
            .lock()
            .unwrap()
            .log_errors
            .insert(pod.to_string());
    }

    pub fn fail_delete(&self, pod: &str) {
        self.state
            .lock()
            .unwrap()
            .delete_errors
            .insert(pod.to_string());
    }

    pub fn gets(&self) -> Vec<ManagedResourceRef> {
        self.state.lock().unwrap().gets.clone()
    }

    pub fn applied(&self) -> Vec<(ResourceKind, DynamicObject)> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn pod_lists(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().pod_lists.clone()
    }

    pub fn log_requests(&self) -> Vec<(PodIdentity, String, i64)> {
        self.state.lock().unwrap().log_requests.clone()
    }

    pub fn deleted(&self) -> Vec<(PodIdentity, PodDeletion)> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn deleted_names(&self) -> Vec<String> {
        self.deleted().into_iter().map(|(p, _)| p.name).collect()
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn get(&self, resource: &ManagedResourceRef) -> ApiResult<Option<DynamicObject>> {
        let mut state = self.state.lock().unwrap();
        state.gets.push(resource.clone());
        if let Some(code) = state.get_errors.get(&resource.name) {
            return Err(api_error(*code));
        }
        Ok(state
            .objects
            .get(&(resource.kind, resource.namespace.clone(), resource.name.clone()))
            .cloned())
    }

    async fn apply(&self, kind: ResourceKind, object: &DynamicObject) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        state.applied.push((kind, object.clone()));
        if let Some(code) = state.apply_error {
            return Err(api_error(code));
        }
        let ns = object.metadata.namespace.clone().unwrap_or_default();
        let name = object.metadata.name.clone().unwrap_or_default();
        state.objects.insert((kind, ns, name), object.clone());
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> ApiResult<Vec<Pod>> {
        let mut state = self.state.lock().unwrap();
        state
            .pod_lists
            .push((namespace.to_string(), label_selector.to_string()));
        Ok(state
            .pods
            .iter()
            .filter(|(selector, pod)| {
                selector == label_selector
                    && pod.metadata.namespace.as_deref() == Some(namespace)
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn previous_log_tail(
        &self,
        pod: &PodIdentity,
        container: &str,
        lines: i64,
    ) -> ApiResult<String> {
        let mut state = self.state.lock().unwrap();
        state
            .log_requests
            .push((pod.clone(), container.to_string(), lines));
        if state.log_errors.contains(&pod.name) {
            return Err(api_error(500));
        }
        Ok(state.logs.get(&pod.name).cloned().unwrap_or_default())
    }

    async fn delete_pod(&self, pod: &PodIdentity, deletion: &PodDeletion) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.delete_errors.contains(&pod.name) {
            return Err(api_error(500));
        }
        state.deleted.push((pod.clone(), *deletion));
        state
            .pods
            .retain(|(_, p)| p.metadata.name.as_deref() != Some(pod.name.as_str()));
        Ok(())
    }
}

/// Fixed desired specs and owner
#[derive(Default)]
pub struct StaticSpecs {
    pub specs: HashMap<String, DynamicObject>,
    pub owner: Option<DynamicObject>,
}

impl StaticSpecs {
    pub fn with_spec(mut self, name: &str, obj: DynamicObject) -> Self {
        self.specs.insert(name.to_string(), obj);
        self
    }

    pub fn with_owner(mut self, owner: DynamicObject) -> Self {
        self.owner = Some(owner);
        self
    }
}

impl DesiredSpecProvider for StaticSpecs {
    fn desired_spec(&self, name: &str) -> Option<DynamicObject> {
        self.specs.get(name).cloned()
    }

    fn owner(&self) -> Option<DynamicObject> {
        self.owner.clone()
    }
}

/// Status call recorded by [`MockStatus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCall {
    SetFromPods,
    Degraded(StatusDomain, String),
    Cleared(StatusDomain),
}

#[derive(Default)]
pub struct MockStatus {
    calls: Mutex<Vec<StatusCall>>,
}

impl MockStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<StatusCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusReporter for MockStatus {
    async fn set_from_pods(&self) {
        self.calls.lock().unwrap().push(StatusCall::SetFromPods);
    }

    async fn set_degraded(&self, domain: StatusDomain, reason: &str, _message: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(StatusCall::Degraded(domain, reason.to_string()));
    }

    async fn clear_degraded(&self, domain: StatusDomain) {
        self.calls.lock().unwrap().push(StatusCall::Cleared(domain));
    }
}
