//! Restart of pods stuck in a crash loop caused by a stale resolver config
//!
//! A pod is remediated only when its monitored container is waiting in
//! `CrashLoopBackOff` and the previous run's log tail contains the policy's
//! failure signature. Pods that cannot be fully diagnosed are never deleted.

use crate::error::ReconcileError;
use crate::models::{ManagedResourceRef, PodIdentity};
use crate::orchestrator::Orchestrator;
use crate::table::CrashLoopPolicy;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// A pod whose monitored container is crash looping, with its last log tail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePod {
    pub identity: PodIdentity,
    pub container: String,
    pub waiting_reason: String,
    pub previous_log_tail: String,
}

impl CandidatePod {
    pub fn is_remediable(&self, policy: &CrashLoopPolicy) -> bool {
        self.previous_log_tail.contains(&policy.signature)
    }
}

/// Pods a remediation pass tried to delete, and those it failed to delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemediationBatchResult {
    pub attempted: BTreeSet<PodIdentity>,
    pub failed: BTreeSet<PodIdentity>,
}

impl RemediationBatchResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn deleted(&self) -> impl Iterator<Item = &PodIdentity> {
        self.attempted.difference(&self.failed)
    }
}

/// Waiting reason of `container` in `pod`, if it is waiting with the given reason
fn crash_loop_reason<'a>(pod: &'a Pod, container: &str, reason: &str) -> Option<&'a str> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .filter(|cs| cs.name == container)
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref()?.reason.as_deref())
        .find(|r| *r == reason)
}

fn pod_identity(pod: &Pod, default_namespace: &str) -> PodIdentity {
    PodIdentity::new(
        pod.metadata
            .namespace
            .clone()
            .unwrap_or_else(|| default_namespace.to_string()),
        pod.metadata.name.clone().unwrap_or_default(),
    )
}

/// Finds and deletes crash-looping pods of one workload
pub struct CrashLoopRemediator {
    orchestrator: Arc<dyn Orchestrator>,
}

impl CrashLoopRemediator {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// List the workload's pods and collect crash-looping candidates with
    /// their previous log tails. Any log retrieval failure aborts the scan.
    pub async fn scan(
        &self,
        workload: &ManagedResourceRef,
        policy: &CrashLoopPolicy,
    ) -> Result<Vec<CandidatePod>, ReconcileError> {
        let pods = self
            .orchestrator
            .list_pods(&workload.namespace, &policy.label_selector)
            .await
            .map_err(|source| ReconcileError::PodList {
                selector: policy.label_selector.clone(),
                source,
            })?;

        let mut candidates = Vec::new();
        for pod in &pods {
            let reason = match crash_loop_reason(pod, &policy.container, &policy.waiting_reason) {
                Some(reason) => reason.to_string(),
                None => continue,
            };
            let identity = pod_identity(pod, &workload.namespace);
            debug!(pod = %identity, reason = %reason, "Container is crash looping");

            let previous_log_tail = self
                .orchestrator
                .previous_log_tail(&identity, &policy.container, policy.log_tail_lines)
                .await
                .map_err(|source| {
                    error!(pod = %identity, error = %source, "Error occurred while getting container logs");
                    ReconcileError::LogRetrieval {
                        pod: identity.clone(),
                        container: policy.container.clone(),
                        source,
                    }
                })?;

            candidates.push(CandidatePod {
                identity,
                container: policy.container.clone(),
                waiting_reason: reason,
                previous_log_tail,
            });
        }
        Ok(candidates)
    }

    /// Delete every pod of `workload` that is crash looping with the policy's
    /// signature. Deletion failures do not stop the remaining deletions but
    /// fail the pass.
    pub async fn remediate(
        &self,
        workload: &ManagedResourceRef,
        policy: &CrashLoopPolicy,
    ) -> Result<RemediationBatchResult, ReconcileError> {
        let remediable: Vec<PodIdentity> = self
            .scan(workload, policy)
            .await?
            .into_iter()
            .filter(|c| c.is_remediable(policy))
            .map(|c| {
                info!(pod = %c.identity, "Pod is in CrashLoopBackOff because of invalid resolv.conf. It shall be restarted");
                c.identity
            })
            .collect();

        let mut result = RemediationBatchResult::default();
        for identity in remediable {
            result.attempted.insert(identity.clone());
            if let Err(e) = self
                .orchestrator
                .delete_pod(&identity, &policy.deletion)
                .await
            {
                error!(pod = %identity, error = %e, "Unable to delete pod. Its deletion will be retried later");
                result.failed.insert(identity);
            }
        }

        if !result.is_success() {
            return Err(ReconcileError::PodDeletion {
                deleted: result.deleted().cloned().collect(),
                failed: result.failed.into_iter().collect(),
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::ResourceKind;
    use crate::table::{Cascade, DNS_FAILURE_SIGNATURE};
    use crate::testing::{pod, running, waiting, MockOrchestrator, NS};

    const SELECTOR: &str = "component=nsx-node-agent";
    const CONTAINER: &str = "nsx-node-agent";

    fn dns_log() -> String {
        format!(
            "2024-01-01 INFO starting\nurllib3: {} (host='nsx-mgr')\n",
            DNS_FAILURE_SIGNATURE
        )
    }

    fn node_agent() -> ManagedResourceRef {
        ManagedResourceRef::new(NS, "nsx-node-agent", ResourceKind::DaemonSet)
    }

    fn setup() -> (Arc<MockOrchestrator>, CrashLoopRemediator) {
        let orchestrator = Arc::new(MockOrchestrator::new());
        let remediator = CrashLoopRemediator::new(orchestrator.clone());
        (orchestrator, remediator)
    }

    #[test]
    fn test_crash_loop_reason_only_for_monitored_container() {
        let p = pod("a", "sidecar", waiting("CrashLoopBackOff"));
        assert!(crash_loop_reason(&p, CONTAINER, "CrashLoopBackOff").is_none());

        let p = pod("a", CONTAINER, waiting("ImagePullBackOff"));
        assert!(crash_loop_reason(&p, CONTAINER, "CrashLoopBackOff").is_none());

        let p = pod("a", CONTAINER, running());
        assert!(crash_loop_reason(&p, CONTAINER, "CrashLoopBackOff").is_none());

        let p = pod("a", CONTAINER, waiting("CrashLoopBackOff"));
        assert_eq!(
            crash_loop_reason(&p, CONTAINER, "CrashLoopBackOff"),
            Some("CrashLoopBackOff")
        );
    }

    #[test]
    fn test_crash_loop_reason_without_status() {
        let p = Pod::default();
        assert!(crash_loop_reason(&p, CONTAINER, "CrashLoopBackOff").is_none());
    }

    #[tokio::test]
    async fn test_deletes_only_pods_with_dns_signature() {
        let (orchestrator, remediator) = setup();
        orchestrator.add_pod(SELECTOR, pod("agent-a", CONTAINER, waiting("CrashLoopBackOff")));
        orchestrator.add_pod(SELECTOR, pod("agent-b", CONTAINER, waiting("CrashLoopBackOff")));
        orchestrator.set_log("agent-a", &dns_log());
        orchestrator.set_log("agent-b", "Traceback: KeyError 'nsx_api_managers'");

        let result = remediator
            .remediate(&node_agent(), &CrashLoopPolicy::node_agent_dns())
            .await
            .unwrap();

        assert_eq!(orchestrator.deleted_names(), vec!["agent-a".to_string()]);
        let (_, deletion) = &orchestrator.deleted()[0];
        assert_eq!(deletion.grace_period_secs, 5);
        assert_eq!(deletion.cascade, Cascade::Foreground);
        assert_eq!(result.attempted.len(), 1);
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_fetches_previous_log_tail_of_monitored_container() {
        let (orchestrator, remediator) = setup();
        orchestrator.add_pod(SELECTOR, pod("agent-a", CONTAINER, waiting("CrashLoopBackOff")));
        orchestrator.add_pod(SELECTOR, pod("agent-b", CONTAINER, running()));

        remediator
            .remediate(&node_agent(), &CrashLoopPolicy::node_agent_dns())
            .await
            .unwrap();

        assert_eq!(
            orchestrator.log_requests(),
            vec![(PodIdentity::new(NS, "agent-a"), CONTAINER.to_string(), 50)]
        );
        assert_eq!(
            orchestrator.pod_lists(),
            vec![(NS.to_string(), SELECTOR.to_string())]
        );
    }

    #[tokio::test]
    async fn test_non_crash_loop_waiting_is_ignored() {
        let (orchestrator, remediator) = setup();
        orchestrator.add_pod(SELECTOR, pod("agent-a", CONTAINER, waiting("ContainerCreating")));
        orchestrator.set_log("agent-a", &dns_log());

        let candidates = remediator
            .scan(&node_agent(), &CrashLoopPolicy::node_agent_dns())
            .await
            .unwrap();

        assert!(candidates.is_empty());
        assert!(orchestrator.log_requests().is_empty());
        assert!(orchestrator.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_pods_outside_selector_untouched() {
        let (orchestrator, remediator) = setup();
        orchestrator.add_pod(
            "component=nsx-ncp",
            pod("ncp-a", CONTAINER, waiting("CrashLoopBackOff")),
        );
        orchestrator.set_log("ncp-a", &dns_log());

        let result = remediator
            .remediate(&node_agent(), &CrashLoopPolicy::node_agent_dns())
            .await
            .unwrap();

        assert!(result.attempted.is_empty());
        assert!(orchestrator.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_log_error_aborts_before_any_deletion() {
        let (orchestrator, remediator) = setup();
        orchestrator.add_pod(SELECTOR, pod("agent-a", CONTAINER, waiting("CrashLoopBackOff")));
        orchestrator.add_pod(SELECTOR, pod("agent-b", CONTAINER, waiting("CrashLoopBackOff")));
        orchestrator.set_log("agent-a", &dns_log());
        orchestrator.fail_log("agent-b");

        let err = remediator
            .remediate(&node_agent(), &CrashLoopPolicy::node_agent_dns())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LogRetrievalError);
        assert!(orchestrator.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_partial_deletion_failure() {
        let (orchestrator, remediator) = setup();
        for name in ["agent-a", "agent-b", "agent-c"] {
            orchestrator.add_pod(SELECTOR, pod(name, CONTAINER, waiting("CrashLoopBackOff")));
            orchestrator.set_log(name, &dns_log());
        }
        orchestrator.fail_delete("agent-b");

        let err = remediator
            .remediate(&node_agent(), &CrashLoopPolicy::node_agent_dns())
            .await
            .unwrap_err();

        match err {
            ReconcileError::PodDeletion { deleted, failed } => {
                assert_eq!(
                    deleted,
                    vec![PodIdentity::new(NS, "agent-a"), PodIdentity::new(NS, "agent-c")]
                );
                assert_eq!(failed, vec![PodIdentity::new(NS, "agent-b")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            orchestrator.deleted_names(),
            vec!["agent-a".to_string(), "agent-c".to_string()]
        );
    }

    #[tokio::test]
    async fn test_next_pass_only_retries_remaining_pods() {
        let (orchestrator, remediator) = setup();
        for name in ["agent-a", "agent-b"] {
            orchestrator.add_pod(SELECTOR, pod(name, CONTAINER, waiting("CrashLoopBackOff")));
            orchestrator.set_log(name, &dns_log());
        }
        orchestrator.fail_delete("agent-b");
        let policy = CrashLoopPolicy::node_agent_dns();

        assert!(remediator.remediate(&node_agent(), &policy).await.is_err());

        let result = remediator.remediate(&node_agent(), &policy).await;
        assert!(result.is_err());
        // agent-a is gone from the pod list and is not deleted twice
        assert_eq!(orchestrator.deleted_names(), vec!["agent-a".to_string()]);
    }

    #[test]
    fn test_batch_result_deleted() {
        let mut result = RemediationBatchResult::default();
        result.attempted.insert(PodIdentity::new(NS, "a"));
        result.attempted.insert(PodIdentity::new(NS, "b"));
        result.failed.insert(PodIdentity::new(NS, "b"));

        let deleted: Vec<_> = result.deleted().cloned().collect();
        assert_eq!(deleted, vec![PodIdentity::new(NS, "a")]);
        assert!(!result.is_success());
    }
}
