//! NCP Operator - keeps the NSX container plugin workloads running
//!
//! Recreates the NCP deployment and daemonsets when they are deleted and
//! restarts node agent pods stuck in a crash loop on DNS resolution failures.

use anyhow::Result;
use clap::Parser;
use kube::Client;
use operator_lib::{
    controller::{ControllerBuilder, ResyncProducer, WatchProducer},
    desired::{ConfigRefresher, DesiredSpecCache, ManifestLoader},
    health::{components, HealthRegistry},
    observability::{OperatorMetrics, StructuredLogger},
    orchestrator::KubeOrchestrator,
    reconcile::{CrashLoopRemediator, DriftReconciler, ReconciliationDispatcher},
    status::StatusManager,
    table::ManagedResourceTable,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "ncp-operator", version, about = "Operator for the NSX container plugin workloads")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(long, env = "NCP_OPERATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Reconcile every managed resource once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();
    info!("Starting ncp-operator");

    let config = config::OperatorConfig::load(cli.config.as_deref())?;
    info!(namespace = %config.namespace, workers = config.workers, "Operator configured");

    let client = Client::try_default().await?;

    let table = Arc::new(ManagedResourceTable::nsx_defaults(
        &config.namespace,
        config.crash_loop_policy(),
    ));

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::CONTROLLER).await;

    let metrics = OperatorMetrics::new();
    let logger = StructuredLogger::new(&config.namespace);
    logger.log_startup(OPERATOR_VERSION, table.len());

    let orchestrator = Arc::new(KubeOrchestrator::new(client.clone()));

    // Desired specs and the owner object must be loaded before the first reconcile
    let cache = Arc::new(DesiredSpecCache::new());
    let refresher = ConfigRefresher::new(
        client.clone(),
        config.owner(),
        ManifestLoader::new(table.clone()),
        config.manifests_dir.clone(),
        cache.clone(),
        config.config_refresh_period(),
    );
    refresher.refresh().await;

    let status = Arc::new(StatusManager::new(
        health_registry.clone(),
        orchestrator.clone(),
        table.clone(),
    ));
    status.register_components().await;

    let dispatcher = Arc::new(
        ReconciliationDispatcher::new(
            table.clone(),
            DriftReconciler::new(orchestrator.clone(), cache.clone()),
            CrashLoopRemediator::new(orchestrator.clone()),
            status,
            logger.clone(),
        )
        .with_resync_interval(config.resync_interval()),
    );

    if cli.once {
        return run_once(&dispatcher, &table).await;
    }

    let controller = ControllerBuilder::new()
        .reconciler(dispatcher)
        .workers(config.workers)
        .reconcile_timeout(config.controller().reconcile_timeout)
        .rate_limit(config.controller().rate_limit)
        .health(health_registry.clone())
        .build()?;
    let queue = controller.queue();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let refresher_handle = tokio::spawn(refresher.run(shutdown_tx.subscribe()));
    let watch_handle = tokio::spawn(
        WatchProducer::new(client, &config.namespace, queue.clone())
            .with_health(health_registry.clone())
            .run(shutdown_tx.subscribe()),
    );
    let resync_handle = tokio::spawn(
        ResyncProducer::new(table, queue, config.resync_interval()).run(shutdown_tx.subscribe()),
    );
    let controller_handle = tokio::spawn(controller.run(shutdown_tx.subscribe()));

    // Mark operator as ready after initialization
    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    for (name, handle) in [
        ("refresher", refresher_handle),
        ("watcher", watch_handle),
        ("resync", resync_handle),
        ("controller", controller_handle),
    ] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Task failed during shutdown");
        }
    }
    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}

/// Dispatch every managed key a single time
async fn run_once(dispatcher: &ReconciliationDispatcher, table: &ManagedResourceTable) -> Result<()> {
    let mut failed = 0usize;
    for key in table.keys() {
        match dispatcher.dispatch(&key).await {
            Ok(action) => info!(key = %key, action = ?action, "Reconciled"),
            Err(e) => {
                error!(key = %key, error = %e, kind = e.kind().as_str(), "Reconciliation failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} resources failed to reconcile", failed, table.len());
    }
    Ok(())
}
