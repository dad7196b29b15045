//! Operator configuration

use anyhow::{Context, Result};
use operator_lib::controller::{ControllerConfig, RateLimit};
use operator_lib::desired::OwnerObjectRef;
use operator_lib::table::{
    Cascade, CrashLoopPolicy, PodDeletion, DEFAULT_DELETION_GRACE_PERIOD_SECS,
    DEFAULT_LOG_TAIL_LINES, NSX_NAMESPACE,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Operator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    /// Namespace holding the managed workloads
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Periodic re-check interval in seconds
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Deadline for a single reconciliation in seconds
    #[serde(default = "default_reconcile_timeout")]
    pub reconcile_timeout_secs: u64,

    /// First retry delay of a failed key in milliseconds
    #[serde(default = "default_retry_base")]
    pub retry_base_millis: u64,

    /// Upper bound of the retry delay in seconds
    #[serde(default = "default_retry_max")]
    pub retry_max_secs: u64,

    /// Directory of YAML manifests with the desired workload specs
    #[serde(default)]
    pub manifests_dir: Option<PathBuf>,

    #[serde(default = "default_owner_group")]
    pub owner_group: String,

    #[serde(default = "default_owner_version")]
    pub owner_version: String,

    #[serde(default = "default_owner_kind")]
    pub owner_kind: String,

    #[serde(default = "default_owner_name")]
    pub owner_name: String,

    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: i64,

    #[serde(default = "default_grace_period")]
    pub deletion_grace_period_secs: u32,

    /// How often manifests and the owner object are reloaded, in seconds
    #[serde(default = "default_config_refresh")]
    pub config_refresh_secs: u64,
}

fn default_namespace() -> String {
    NSX_NAMESPACE.to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_resync_interval() -> u64 {
    120
}

fn default_workers() -> usize {
    2
}

fn default_reconcile_timeout() -> u64 {
    60
}

fn default_retry_base() -> u64 {
    500
}

fn default_retry_max() -> u64 {
    300
}

fn default_owner_group() -> String {
    OwnerObjectRef::default().group
}

fn default_owner_version() -> String {
    OwnerObjectRef::default().version
}

fn default_owner_kind() -> String {
    OwnerObjectRef::default().kind
}

fn default_owner_name() -> String {
    OwnerObjectRef::default().name
}

fn default_log_tail_lines() -> i64 {
    DEFAULT_LOG_TAIL_LINES
}

fn default_grace_period() -> u32 {
    DEFAULT_DELETION_GRACE_PERIOD_SECS
}

fn default_config_refresh() -> u64 {
    30
}

impl OperatorConfig {
    /// Load configuration from an optional file and `OPERATOR_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Same as [`OperatorConfig::load`] with an explicit environment map
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("OPERATOR")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .context("Failed to read operator configuration")?;

        let config: OperatorConfig = config
            .try_deserialize()
            .context("Invalid operator configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            anyhow::bail!("namespace must not be empty");
        }
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.resync_interval_secs == 0 || self.config_refresh_secs == 0 {
            anyhow::bail!("resync and refresh intervals must be positive");
        }
        if self.reconcile_timeout_secs == 0 {
            anyhow::bail!("reconcile_timeout_secs must be positive");
        }
        if self.retry_base_millis == 0 {
            anyhow::bail!("retry_base_millis must be positive");
        }
        if self.log_tail_lines <= 0 {
            anyhow::bail!("log_tail_lines must be positive");
        }
        Ok(())
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn config_refresh_period(&self) -> Duration {
        Duration::from_secs(self.config_refresh_secs)
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
            rate_limit: RateLimit {
                base: Duration::from_millis(self.retry_base_millis),
                max: Duration::from_secs(self.retry_max_secs),
            },
        }
    }

    pub fn owner(&self) -> OwnerObjectRef {
        OwnerObjectRef {
            group: self.owner_group.clone(),
            version: self.owner_version.clone(),
            kind: self.owner_kind.clone(),
            name: self.owner_name.clone(),
        }
    }

    /// Node agent crash-loop policy with the configured tail and grace period
    pub fn crash_loop_policy(&self) -> CrashLoopPolicy {
        CrashLoopPolicy {
            log_tail_lines: self.log_tail_lines,
            deletion: PodDeletion {
                grace_period_secs: self.deletion_grace_period_secs,
                cascade: Cascade::Foreground,
            },
            ..CrashLoopPolicy::node_agent_dns()
        }
    }
}
