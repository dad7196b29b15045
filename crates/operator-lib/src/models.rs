//! Core data models for the operator

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of workload a managed resource is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Deployment,
    DaemonSet,
}

impl ResourceKind {
    /// API resource used for dynamic reads and applies of this kind
    pub fn api_resource(&self) -> ApiResource {
        match self {
            ResourceKind::Deployment => ApiResource::erase::<Deployment>(&()),
            ResourceKind::DaemonSet => ApiResource::erase::<DaemonSet>(&()),
        }
    }

    /// Kind string as it appears in manifests
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::DaemonSet => "DaemonSet",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace/name identity of an object, used as the work queue key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A workload this operator keeps alive
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedResourceRef {
    pub namespace: String,
    pub name: String,
    pub kind: ResourceKind,
}

impl ManagedResourceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

impl fmt::Display for ManagedResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Namespace/name identity of a pod
pub type PodIdentity = ObjectKey;
