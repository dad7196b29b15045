//! Event producers feeding the work queue
//!
//! The watch producer enqueues every touched Deployment and DaemonSet in the
//! operator namespace. The resync producer enqueues every managed key on a
//! fixed period, so deleted workloads are noticed even if a watch event is lost.

use super::WorkQueue;
use crate::health::{components, HealthRegistry};
use crate::models::ObjectKey;
use crate::table::ManagedResourceTable;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// Queue key of a namespaced object
pub fn object_key<K: ResourceExt>(obj: &K) -> Option<ObjectKey> {
    let namespace = obj.namespace()?;
    let name = obj.meta().name.clone()?;
    Some(ObjectKey::new(namespace, name))
}

/// Enqueue keys from `events` until shutdown.
///
/// Returns `false` when the stream ended on its own; the controller component
/// is then marked unhealthy since no further events will arrive.
pub async fn forward_keys<S, E>(
    events: S,
    queue: &WorkQueue<ObjectKey>,
    health: Option<&HealthRegistry>,
    mut shutdown: broadcast::Receiver<()>,
) -> bool
where
    S: Stream<Item = Result<Option<ObjectKey>, E>>,
    E: std::fmt::Display,
{
    tokio::pin!(events);

    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(Ok(Some(key))) => {
                        debug!(key = %key, "Workload event");
                        queue.add(key);
                    }
                    Some(Ok(None)) => {}
                    Some(Err(e)) => warn!(error = %e, "Workload watch error"),
                    None => {
                        warn!("Workload watch streams ended");
                        if let Some(health) = health {
                            health
                                .set_unhealthy(components::CONTROLLER, "Workload watch streams ended")
                                .await;
                        }
                        return false;
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down workload watchers");
                return true;
            }
        }
    }
}

/// Watches the workload kinds of the operator namespace
pub struct WatchProducer {
    client: Client,
    namespace: String,
    queue: WorkQueue<ObjectKey>,
    health: Option<HealthRegistry>,
}

impl WatchProducer {
    pub fn new(client: Client, namespace: impl Into<String>, queue: WorkQueue<ObjectKey>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            queue,
            health: None,
        }
    }

    /// Report a dead watch through the controller health component
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        info!(namespace = %self.namespace, "Starting workload watchers");

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let daemonsets: Api<DaemonSet> = Api::namespaced(self.client.clone(), &self.namespace);

        // Deletions are touched objects too, which is what drift detection needs
        let deployment_keys = watcher(deployments, watcher::Config::default())
            .default_backoff()
            .touched_objects()
            .map(|res| res.map(|obj| object_key(&obj)));
        let daemonset_keys = watcher(daemonsets, watcher::Config::default())
            .default_backoff()
            .touched_objects()
            .map(|res| res.map(|obj| object_key(&obj)));

        let events = deployment_keys.merge(daemonset_keys);
        forward_keys(events, &self.queue, self.health.as_ref(), shutdown).await;
    }
}

/// Periodically enqueues every managed key
pub struct ResyncProducer {
    table: Arc<ManagedResourceTable>,
    queue: WorkQueue<ObjectKey>,
    period: Duration,
}

impl ResyncProducer {
    pub fn new(table: Arc<ManagedResourceTable>, queue: WorkQueue<ObjectKey>, period: Duration) -> Self {
        Self {
            table,
            queue,
            period,
        }
    }

    /// Enqueue all managed keys once
    pub fn enqueue_all(&self) -> usize {
        let keys = self.table.keys();
        let count = keys.len();
        for key in keys {
            self.queue.add(key);
        }
        count
    }

    /// The first tick fires immediately and doubles as the initial list
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(period_secs = self.period.as_secs(), "Starting resync producer");
        let mut ticker = interval(self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let count = self.enqueue_all();
                    debug!(keys = count, "Resync tick");
                }
                _ = shutdown.recv() => {
                    info!("Shutting down resync producer");
                    break;
                }
            }
        }
    }
}
