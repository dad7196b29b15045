//! Error types for reconciliation

use crate::models::{ManagedResourceRef, PodIdentity};
use crate::status::StatusDomain;
use thiserror::Error;

/// Coarse classification of a reconciliation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigNotReady,
    LookupError,
    OwnershipError,
    ApplyError,
    PodListError,
    LogRetrievalError,
    PodDeletionError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigNotReady => "config_not_ready",
            ErrorKind::LookupError => "lookup_error",
            ErrorKind::OwnershipError => "ownership_error",
            ErrorKind::ApplyError => "apply_error",
            ErrorKind::PodListError => "pod_list_error",
            ErrorKind::LogRetrievalError => "log_retrieval_error",
            ErrorKind::PodDeletionError => "pod_deletion_error",
        }
    }
}

/// Failure to attach a controller owner reference
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OwnershipError {
    #[error("owner is missing {0}")]
    MissingOwnerField(&'static str),

    #[error("cross-namespace owner references are disallowed, owner's namespace {owner}, obj's namespace {object}")]
    CrossNamespace { owner: String, object: String },

    #[error("object is already owned by another {kind} controller {name}")]
    AlreadyOwned { kind: String, name: String },
}

/// Errors reported by a single reconciliation invocation
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("configuration not ready: {0}")]
    ConfigNotReady(String),

    #[error("could not retrieve {resource}: {source}")]
    Lookup {
        resource: ManagedResourceRef,
        #[source]
        source: kube::Error,
    },

    #[error("could not set owner reference for {resource}: {source}")]
    Ownership {
        resource: ManagedResourceRef,
        #[source]
        source: OwnershipError,
    },

    #[error("could not apply {resource}: {source}")]
    Apply {
        resource: ManagedResourceRef,
        #[source]
        source: kube::Error,
    },

    #[error("could not list pods with selector {selector}: {source}")]
    PodList {
        selector: String,
        #[source]
        source: kube::Error,
    },

    #[error("could not get previous logs of container {container} in pod {pod}: {source}")]
    LogRetrieval {
        pod: PodIdentity,
        container: String,
        #[source]
        source: kube::Error,
    },

    #[error(
        "failed to delete {} of {} crash-looping pods, will retry",
        failed.len(),
        deleted.len() + failed.len()
    )]
    PodDeletion {
        deleted: Vec<PodIdentity>,
        failed: Vec<PodIdentity>,
    },
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::ConfigNotReady(_) => ErrorKind::ConfigNotReady,
            ReconcileError::Lookup { .. } => ErrorKind::LookupError,
            ReconcileError::Ownership { .. } => ErrorKind::OwnershipError,
            ReconcileError::Apply { .. } => ErrorKind::ApplyError,
            ReconcileError::PodList { .. } => ErrorKind::PodListError,
            ReconcileError::LogRetrieval { .. } => ErrorKind::LogRetrievalError,
            ReconcileError::PodDeletion { .. } => ErrorKind::PodDeletionError,
        }
    }

    /// Status domain and reason to report this error under.
    ///
    /// `None` for errors expected during bootstrap, which are only retried.
    pub fn degraded_reason(&self) -> Option<(StatusDomain, &'static str)> {
        match self {
            ReconcileError::ConfigNotReady(_) => None,
            ReconcileError::Lookup { .. } => Some((StatusDomain::OperatorConfig, "LookupError")),
            ReconcileError::Ownership { .. } => {
                Some((StatusDomain::OperatorConfig, "ApplyObjectsError"))
            }
            ReconcileError::Apply { .. } => {
                Some((StatusDomain::OperatorConfig, "ApplyOperatorConfig"))
            }
            ReconcileError::PodList { .. }
            | ReconcileError::LogRetrieval { .. }
            | ReconcileError::PodDeletion { .. } => {
                Some((StatusDomain::PodRemediation, "CrashLoopRemediationFailed"))
            }
        }
    }
}

/// Errors building the managed resource table
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("resource {namespace}/{name} is listed more than once")]
    Duplicate { namespace: String, name: String },
}
