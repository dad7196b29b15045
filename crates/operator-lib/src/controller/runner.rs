//! Worker pool draining the reconcile queue

use super::{RateLimit, WorkQueue};
use crate::error::ReconcileError;
use crate::health::{components, HealthRegistry};
use crate::models::ObjectKey;
use crate::observability::OperatorMetrics;
use crate::reconcile::{Action, ReconciliationDispatcher};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Handles one queue key
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError>;
}

#[async_trait]
impl Reconciler for ReconciliationDispatcher {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        self.dispatch(key).await
    }
}

/// Configuration for the controller worker pool
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Concurrent workers (default: 2)
    pub workers: usize,
    /// Deadline for a single reconciliation (default: 60 seconds)
    pub reconcile_timeout: Duration,
    /// Retry delays for failed keys
    pub rate_limit: RateLimit,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            reconcile_timeout: Duration::from_secs(60),
            rate_limit: RateLimit::default(),
        }
    }
}

struct Shared {
    reconciler: Arc<dyn Reconciler>,
    queue: WorkQueue<ObjectKey>,
    reconcile_timeout: Duration,
    metrics: OperatorMetrics,
}

pub struct Controller {
    shared: Arc<Shared>,
    workers: usize,
    health: Option<HealthRegistry>,
}

impl Controller {
    pub fn new(reconciler: Arc<dyn Reconciler>, config: ControllerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                reconciler,
                queue: WorkQueue::new(config.rate_limit),
                reconcile_timeout: config.reconcile_timeout,
                metrics: OperatorMetrics::new(),
            }),
            workers: config.workers.max(1),
            health: None,
        }
    }

    /// Report a dead worker pool through the controller health component
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Queue handle for producers
    pub fn queue(&self) -> WorkQueue<ObjectKey> {
        self.shared.queue.clone()
    }

    /// Run the workers until shutdown is signalled
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(workers = self.workers, "Starting controller");

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let shared = self.shared.clone();
            workers.spawn(async move { shared.work(id).await });
        }

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutting down controller");
            }
            res = workers.join_next() => {
                let reason = match res {
                    Some(Err(e)) => format!("Controller worker exited unexpectedly: {}", e),
                    _ => "Controller worker exited unexpectedly".to_string(),
                };
                warn!("{}", reason);
                if let Some(health) = &self.health {
                    health.set_unhealthy(components::CONTROLLER, reason).await;
                }
            }
        }

        self.shared.queue.shut_down();
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "Controller worker panicked");
            }
        }
    }
}

impl Shared {
    async fn work(&self, id: usize) {
        while let Some(key) = self.queue.get().await {
            self.metrics.set_queue_depth(self.queue.len() as i64);
            self.process(&key).await;
            self.queue.done(&key);
        }
        debug!(worker = id, "Worker stopped");
    }

    async fn process(&self, key: &ObjectKey) {
        let result = tokio::time::timeout(self.reconcile_timeout, self.reconciler.reconcile(key)).await;

        match result {
            Ok(Ok(Action::Done)) => {
                self.queue.forget(key);
            }
            Ok(Ok(Action::RequeueAfter(delay))) => {
                self.queue.forget(key);
                self.queue.add_after(key.clone(), delay);
            }
            Ok(Err(e)) => {
                let delay = self.queue.add_rate_limited(key.clone());
                debug!(
                    key = %key,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Reconciliation will be retried"
                );
            }
            Err(_) => {
                let delay = self.queue.add_rate_limited(key.clone());
                warn!(
                    key = %key,
                    timeout_secs = self.reconcile_timeout.as_secs(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Reconciliation timed out"
                );
            }
        }
    }
}

/// Builder for the controller
pub struct ControllerBuilder {
    reconciler: Option<Arc<dyn Reconciler>>,
    config: ControllerConfig,
    health: Option<HealthRegistry>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self {
            reconciler: None,
            config: ControllerConfig::default(),
            health: None,
        }
    }

    pub fn reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.config.reconcile_timeout = timeout;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<Controller> {
        let reconciler = self
            .reconciler
            .ok_or_else(|| anyhow::anyhow!("Reconciler is required"))?;
        if self.config.workers == 0 {
            anyhow::bail!("At least one worker is required");
        }
        let controller = Controller::new(reconciler, self.config);
        Ok(match self.health {
            Some(health) => controller.with_health(health),
            None => controller,
        })
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
