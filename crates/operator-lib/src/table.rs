//! Registry of the workloads this operator is responsible for
//!
//! Each entry is a tagged record: its [`ResourceKind`] selects how it is read
//! and applied, and an optional [`CrashLoopPolicy`] marks workloads whose pods
//! get log-based crash-loop remediation. Adding a managed workload is a data
//! change, not a code change.

use crate::error::TableError;
use crate::models::{ManagedResourceRef, ObjectKey, ResourceKind};
use std::collections::HashSet;

/// Namespace the NCP workloads live in
pub const NSX_NAMESPACE: &str = "nsx-system";
pub const NSX_NCP_DEPLOYMENT_NAME: &str = "nsx-ncp";
pub const NSX_NODE_AGENT_DS_NAME: &str = "nsx-node-agent";
pub const NSX_NCP_BOOTSTRAP_DS_NAME: &str = "nsx-ncp-bootstrap";
pub const NSX_NODE_AGENT_CONTAINER_NAME: &str = "nsx-node-agent";

/// Waiting reason the kubelet reports for a container in restart backoff
pub const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";

/// Log line left by the node agent when the pod's resolv.conf is stale
pub const DNS_FAILURE_SIGNATURE: &str =
    "Failed to establish a new connection: [Errno -2] Name or service not known";

pub const DEFAULT_LOG_TAIL_LINES: i64 = 50;
pub const DEFAULT_DELETION_GRACE_PERIOD_SECS: u32 = 5;

/// Deletion propagation for remediated pods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cascade {
    Foreground,
    Background,
    Orphan,
}

/// How a remediable pod is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodDeletion {
    pub grace_period_secs: u32,
    pub cascade: Cascade,
}

impl Default for PodDeletion {
    fn default() -> Self {
        Self {
            grace_period_secs: DEFAULT_DELETION_GRACE_PERIOD_SECS,
            cascade: Cascade::Foreground,
        }
    }
}

/// Crash-loop remediation settings for one workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashLoopPolicy {
    /// Container whose status and logs are inspected
    pub container: String,
    /// Label selector matching the workload's pods
    pub label_selector: String,
    /// Waiting reason that makes a pod a candidate
    pub waiting_reason: String,
    /// Lines fetched from the end of the previous run's log
    pub log_tail_lines: i64,
    /// Substring that makes a candidate remediable
    pub signature: String,
    pub deletion: PodDeletion,
}

impl CrashLoopPolicy {
    /// Policy for the node agent pods that crash on a stale resolver config
    pub fn node_agent_dns() -> Self {
        Self {
            container: NSX_NODE_AGENT_CONTAINER_NAME.to_string(),
            label_selector: format!("component={}", NSX_NODE_AGENT_DS_NAME),
            waiting_reason: CRASH_LOOP_BACK_OFF.to_string(),
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            signature: DNS_FAILURE_SIGNATURE.to_string(),
            deletion: PodDeletion::default(),
        }
    }
}

/// One table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedResource {
    pub reference: ManagedResourceRef,
    pub remediation: Option<CrashLoopPolicy>,
}

impl ManagedResource {
    pub fn new(reference: ManagedResourceRef) -> Self {
        Self {
            reference,
            remediation: None,
        }
    }

    pub fn with_remediation(mut self, policy: CrashLoopPolicy) -> Self {
        self.remediation = Some(policy);
        self
    }
}

/// Immutable set of managed resources, unique by namespace/name
#[derive(Debug, Clone)]
pub struct ManagedResourceTable {
    entries: Vec<ManagedResource>,
}

impl ManagedResourceTable {
    pub fn new(entries: Vec<ManagedResource>) -> Result<Self, TableError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.reference.key()) {
                return Err(TableError::Duplicate {
                    namespace: entry.reference.namespace.clone(),
                    name: entry.reference.name.clone(),
                });
            }
        }
        Ok(Self { entries })
    }

    /// The NCP workloads in `namespace`: one deployment and two daemon sets
    pub fn nsx_defaults(namespace: &str, policy: CrashLoopPolicy) -> Self {
        Self {
            entries: vec![
                ManagedResource::new(ManagedResourceRef::new(
                    namespace,
                    NSX_NODE_AGENT_DS_NAME,
                    ResourceKind::DaemonSet,
                ))
                .with_remediation(policy),
                ManagedResource::new(ManagedResourceRef::new(
                    namespace,
                    NSX_NCP_BOOTSTRAP_DS_NAME,
                    ResourceKind::DaemonSet,
                )),
                ManagedResource::new(ManagedResourceRef::new(
                    namespace,
                    NSX_NCP_DEPLOYMENT_NAME,
                    ResourceKind::Deployment,
                )),
            ],
        }
    }

    pub fn lookup(&self, key: &ObjectKey) -> Option<&ManagedResource> {
        self.entries
            .iter()
            .find(|e| e.reference.namespace == key.namespace && e.reference.name == key.name)
    }

    pub fn by_name(&self, name: &str) -> Option<&ManagedResource> {
        self.entries.iter().find(|e| e.reference.name == name)
    }

    pub fn entries(&self) -> &[ManagedResource] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.entries.iter().map(|e| e.reference.key()).collect()
    }

    /// Distinct namespaces covered by the table
    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.reference.namespace.clone())
            .collect();
        namespaces.sort();
        namespaces.dedup();
        namespaces
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ManagedResource> {
        self.entries.iter().filter(move |e| e.reference.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nsx_defaults() {
        let table = ManagedResourceTable::nsx_defaults(NSX_NAMESPACE, CrashLoopPolicy::node_agent_dns());
        assert_eq!(table.len(), 3);
        assert_eq!(table.of_kind(ResourceKind::DaemonSet).count(), 2);
        assert_eq!(table.of_kind(ResourceKind::Deployment).count(), 1);
        assert_eq!(table.namespaces(), vec![NSX_NAMESPACE.to_string()]);

        let agent = table
            .lookup(&ObjectKey::new(NSX_NAMESPACE, NSX_NODE_AGENT_DS_NAME))
            .unwrap();
        let policy = agent.remediation.as_ref().unwrap();
        assert_eq!(policy.label_selector, "component=nsx-node-agent");
        assert_eq!(policy.log_tail_lines, 50);
        assert_eq!(policy.deletion.grace_period_secs, 5);
        assert_eq!(policy.deletion.cascade, Cascade::Foreground);

        let ncp = table.by_name(NSX_NCP_DEPLOYMENT_NAME).unwrap();
        assert!(ncp.remediation.is_none());
    }

    #[test]
    fn test_lookup_requires_namespace_match() {
        let table = ManagedResourceTable::nsx_defaults(NSX_NAMESPACE, CrashLoopPolicy::node_agent_dns());
        assert!(table
            .lookup(&ObjectKey::new("default", NSX_NCP_DEPLOYMENT_NAME))
            .is_none());
        assert!(table
            .lookup(&ObjectKey::new(NSX_NAMESPACE, "coredns"))
            .is_none());
    }

    #[test]
    fn test_duplicate_entries_rejected() {
        let r = ManagedResourceRef::new("ns", "dup", ResourceKind::Deployment);
        let other_kind = ManagedResourceRef::new("ns", "dup", ResourceKind::DaemonSet);
        let err = ManagedResourceTable::new(vec![
            ManagedResource::new(r),
            ManagedResource::new(other_kind),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            TableError::Duplicate {
                namespace: "ns".into(),
                name: "dup".into()
            }
        );
    }

    #[test]
    fn test_same_name_different_namespace_allowed() {
        let table = ManagedResourceTable::new(vec![
            ManagedResource::new(ManagedResourceRef::new("a", "x", ResourceKind::Deployment)),
            ManagedResource::new(ManagedResourceRef::new("b", "x", ResourceKind::Deployment)),
        ])
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.namespaces(), vec!["a".to_string(), "b".to_string()]);
    }
}
